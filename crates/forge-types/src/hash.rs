use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The width, in bytes, of every fixed-width hash in this crate.
///
/// §9 of the spec leaves the exact width an open question; we pick 256
/// bits (SHA-256) since it matches the `sha2`/`sha1` already present in
/// the surrounding dependency stack.
pub const HASH_LEN: usize = 32;

/// Tag identifying which hash function produced a [`ContentHash`].
///
/// Only `Sha256` is implemented today, but the tag is serialized alongside
/// every hash so the content-hash remapping table can key on it
/// without a breaking change if a second hash type is added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HashType {
    Sha256 = 0,
}

/// A fixed-width array of raw hash bytes, shared by every hash newtype in
/// this crate so they all get the same ordering, hex formatting, and
/// short-code behavior for free.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawHash([u8; HASH_LEN]);

impl RawHash {
    pub const fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// The 32-bit short code used for set-membership in the historic
    /// cache's garbage collector: the first four bytes,
    /// little-endian.
    pub fn short_code(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// XOR two raw hashes in place, producing a third. Used to derive
    /// `Fingerprint = weak XOR strong` without heap allocation,
    /// per DESIGN NOTES' "fixed-size array with in-place XOR" guidance.
    pub fn xor(&self, other: &Self) -> Self {
        let mut out = [0u8; HASH_LEN];
        for i in 0..HASH_LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        Self(out)
    }

    pub fn hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }
}

impl fmt::Debug for RawHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl fmt::Display for RawHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

/// Hash the given bytes with the crate-wide default hash function.
fn hash_bytes(bytes: &[u8]) -> RawHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    RawHash(out)
}

/// Streaming hasher wrapper, shared by the content store and source
/// verifier so both hash files the same way.
#[derive(Default)]
pub struct StreamingHasher(Sha256);

impl StreamingHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> RawHash {
        let digest = self.0.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest);
        RawHash(out)
    }
}

macro_rules! hash_newtype {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(RawHash);

        impl $name {
            pub const fn from_raw(raw: RawHash) -> Self {
                Self(raw)
            }

            pub const fn zero() -> Self {
                Self(RawHash::zero())
            }

            pub fn from_bytes(bytes: &[u8]) -> Self {
                Self(hash_bytes(bytes))
            }

            pub fn raw(&self) -> &RawHash {
                &self.0
            }

            pub fn short_code(&self) -> u32 {
                self.0.short_code()
            }

            pub fn hex(&self) -> String {
                self.0.hex()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0.hex())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.hex())
            }
        }
    };
}

hash_newtype!(
    ContentHash,
    "Opaque fixed-width byte string identifying a blob by content."
);
hash_newtype!(
    WeakFingerprint,
    "Hash over the static, pre-observation inputs of a pip."
);
hash_newtype!(
    StrongFingerprint,
    "Hash over a pathset plus the content observed at those paths."
);
hash_newtype!(
    PathSetHash,
    "Content hash of a serialized pathset."
);

/// `Fingerprint = WeakFingerprint XOR StrongFingerprint`, a derived,
/// compact key used by the historic cache's `fullFingerprint` index.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(RawHash);

impl Fingerprint {
    /// Compute `weak XOR strong`.
    pub fn new(weak: &WeakFingerprint, strong: &StrongFingerprint) -> Self {
        Self(weak.raw().xor(strong.raw()))
    }

    pub fn raw(&self) -> &RawHash {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.0.hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hex())
    }
}

/// Well-known sentinel hashes. These never correspond to real blob
/// content; they are recognized by value at the seams that consult them
/// (materialization, file-hash registry).
pub struct WellKnownContentHashes;

impl WellKnownContentHashes {
    /// "Path must not exist." Materializing a file with this hash deletes
    /// any existing file at the target path.
    pub fn absent_file() -> ContentHash {
        ContentHash::from_raw(RawHash::from_bytes([0xffu8; HASH_LEN]))
    }

    /// "Outside tracked scope; do not treat as a real hash." Returned by
    /// the file-hash registry when a probed path turns out to be a
    /// directory.
    pub fn untracked_file() -> ContentHash {
        let mut bytes = [0xfeu8; HASH_LEN];
        bytes[0] = 0x00;
        ContentHash::from_raw(RawHash::from_bytes(bytes))
    }

    /// Placeholder for a missing fingerprint.
    pub fn zero_hash() -> ContentHash {
        ContentHash::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_weak_xor_strong_byte_for_byte() {
        let weak = WeakFingerprint::from_bytes(b"weak-input");
        let strong = StrongFingerprint::from_bytes(b"strong-input");
        let fp = Fingerprint::new(&weak, &strong);

        let mut expected = [0u8; HASH_LEN];
        for i in 0..HASH_LEN {
            expected[i] = weak.raw().as_bytes()[i] ^ strong.raw().as_bytes()[i];
        }
        assert_eq!(fp.raw().as_bytes(), &expected);
    }

    #[test]
    fn xor_is_its_own_inverse() {
        let a = ContentHash::from_bytes(b"a");
        let b = ContentHash::from_bytes(b"b");
        let xored = a.raw().xor(b.raw());
        let back = xored.xor(b.raw());
        assert_eq!(back, *a.raw());
    }

    #[test]
    fn short_code_is_stable() {
        let h = ContentHash::from_bytes(b"stable-input");
        assert_eq!(h.short_code(), h.short_code());
        assert_eq!(
            h.short_code(),
            u32::from_le_bytes(h.raw().as_bytes()[0..4].try_into().unwrap())
        );
    }

    #[test]
    fn sentinels_are_distinct_and_stable() {
        assert_ne!(
            WellKnownContentHashes::absent_file(),
            WellKnownContentHashes::untracked_file()
        );
        assert_ne!(
            WellKnownContentHashes::absent_file(),
            WellKnownContentHashes::zero_hash()
        );
        assert_eq!(ContentHash::zero(), WellKnownContentHashes::zero_hash());
    }

    #[test]
    fn hashes_round_trip_through_serde() {
        let h = ContentHash::from_bytes(b"round-trip-me");
        let json = serde_json::to_string(&h).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
    }
}
