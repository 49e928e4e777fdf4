//! End-to-end scenarios spanning the whole engine: a cache round trip
//! through the two-phase and historic layers, then a materialization
//! batch that exercises absent-file deletion and opaque directory
//! replacement together.

use forge_content::ContentStore;
use forge_engine::{Engine, EngineConfig};
use forge_materialize::{MaterializationInput, MaterializePolicy, MaterializeRequest};
use forge_pipcache::PublishResult;
use forge_twophase::LookupHints;
use forge_types::{
    AbsolutePath, DirectoryArtifact, FileArtifact, FileMaterializationInfo, ObservationFlags,
    ObservedPathSet, Origin, PartialSealId, PublishMode, StrongFingerprint, WeakFingerprint,
    WellKnownContentHashes,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct BuildMetadata {
    exit_code: i32,
    stdout_hash: String,
}

impl forge_content::PossiblyCorrupted for BuildMetadata {}

#[tokio::test]
async fn publish_and_retrieve_round_trips_through_historic_and_two_phase() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Engine::open_local(tmp.path(), EngineConfig::default()).unwrap();

    let weak = WeakFingerprint::from_bytes(b"compile main.rs");
    let strong = StrongFingerprint::from_bytes(b"main.rs@v1");
    let mut pathset = ObservedPathSet::new();
    pathset.push(AbsolutePath::new("/src/main.rs"), ObservationFlags::CONTENT);
    let metadata = BuildMetadata {
        exit_code: 0,
        stdout_hash: "deadbeef".to_string(),
    };

    let published = engine
        .publish(&weak, &strong, &pathset, &metadata, "local", vec![], PublishMode::CreateNew)
        .await
        .unwrap();
    let PublishResult::Published { path_set_hash, .. } = published else {
        panic!("first publish for this key should not converge with anything");
    };

    let candidates = engine.candidates(&weak, &LookupHints::default()).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].strong, strong);

    let hit = engine
        .retrieve::<BuildMetadata>(&weak, &path_set_hash, &strong)
        .await
        .unwrap()
        .expect("published entry is retrievable immediately");
    assert_eq!(hit.metadata, metadata);

    let round_tripped_pathset = engine.load_pathset(&path_set_hash).await.unwrap();
    assert_eq!(round_tripped_pathset, pathset);
}

#[tokio::test]
async fn materialize_handles_absent_files_and_opaque_directories_in_one_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = Engine::open_local(tmp.path(), EngineConfig::default()).unwrap();

    // An absent-file materialization: stale file on disk, expected hash
    // says it must not exist.
    let stale_path = tmp.path().join("stale-output.txt");
    std::fs::write(&stale_path, b"leftover from a previous run").unwrap();
    let absent_file = FileArtifact::output(AbsolutePath::new(&stale_path), 1);
    engine
        .report_output(
            absent_file.clone(),
            FileMaterializationInfo::new(WellKnownContentHashes::absent_file()),
            Origin::NotMaterialized,
        )
        .unwrap();

    // An opaque directory whose only declared content this run is one file.
    let opaque_root = tmp.path().join("opaque-out");
    std::fs::create_dir(&opaque_root).unwrap();
    std::fs::write(opaque_root.join("extra.txt"), b"undeclared leftover").unwrap();
    let opaque_dir = DirectoryArtifact {
        path: AbsolutePath::new(&opaque_root),
        partial_seal_id: PartialSealId(1),
        is_shared_opaque: false,
    };
    let produced_hash = engine.content.store_bytes(b"fresh build output", None).await.unwrap();
    let produced_file = FileArtifact::output(AbsolutePath::new(opaque_root.join("out.bin")), 1);
    engine
        .report_output(
            produced_file.clone(),
            FileMaterializationInfo::new(produced_hash).with_length(19),
            Origin::NotMaterialized,
        )
        .unwrap();
    engine.seals.register_dynamic(opaque_dir.clone(), vec![produced_file.clone()]);

    let report = engine
        .materialize_dependencies(MaterializeRequest {
            inputs: vec![
                MaterializationInput::File(absent_file.clone()),
                MaterializationInput::File(produced_file.clone()),
            ],
            dynamic_directories: vec![forge_materialize::DynamicDirectoryRequest {
                directory: opaque_dir.clone(),
                preserve_existing_outputs: false,
            }],
            hydrate_reads: vec![],
            policy: MaterializePolicy::default(),
        })
        .await;

    assert!(!stale_path.exists());
    assert_eq!(report.origins.get(&absent_file), Some(&Ok(Origin::DeployedFromCache)));

    assert!(!opaque_root.join("extra.txt").exists());
    assert_eq!(
        std::fs::read_to_string(opaque_root.join("out.bin")).unwrap(),
        "fresh build output"
    );
    assert!(report.failed_directories.is_empty());
    assert!(engine.materialize.is_directory_materialized(&opaque_dir));
}
