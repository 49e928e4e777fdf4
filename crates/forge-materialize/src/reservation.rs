//! Generic per-key reservation discipline.
//!
//! `try_reserve` gives compare-and-insert semantics over a `DashMap`: the
//! first caller for a key gets [`Reservation::Reserved`] and is
//! responsible for eventually calling [`Reserver::complete`]; every other
//! caller for the same key gets [`Reservation::Observed`] and just awaits
//! the same [`Completion`]. Because every completion is a `Result`, a
//! cancelled or failed attempt is itself a value every waiter observes —
//! there is no path on which a reservation is simply dropped unresolved.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use tokio::sync::watch;

/// The read side of a reservation: clone-able, awaitable exactly once
/// (further `wait()` calls just return the cached value immediately).
#[derive(Debug, Clone)]
pub struct Completion<V: Clone> {
    rx: watch::Receiver<Option<V>>,
}

impl<V: Clone> Completion<V> {
    /// Block until the reserver completes this key, then return its
    /// value. Safe to call from multiple tasks concurrently and multiple
    /// times from the same task.
    pub async fn wait(&self) -> V {
        let mut rx = self.rx.clone();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            if rx.changed().await.is_err() {
                // The reserver was dropped without completing. Every call
                // site in this crate completes on every exit path
                // (success, failure, or cancellation) specifically to
                // avoid this; reaching it is a bug in this crate, not a
                // condition callers should need to handle.
                unreachable!("reservation dropped without being completed");
            }
        }
    }

    /// The value if the reservation has already completed, without
    /// waiting.
    pub fn peek(&self) -> Option<V> {
        self.rx.borrow().clone()
    }
}

/// The write side of a reservation, held only by whichever caller
/// observed [`Reservation::Reserved`].
pub struct Reserver<V: Clone> {
    tx: watch::Sender<Option<V>>,
}

impl<V: Clone> Reserver<V> {
    /// Resolve this reservation for every waiter. Consumes `self` so a
    /// reservation can only be completed once.
    pub fn complete(self, value: V) {
        let _ = self.tx.send(Some(value));
    }
}

/// Outcome of [`try_reserve`].
pub enum Reservation<V: Clone> {
    /// No prior reservation existed for this key; the caller must
    /// eventually call [`Reserver::complete`] on the first element.
    Reserved(Reserver<V>, Completion<V>),
    /// A reservation (by this caller or another) already exists; await
    /// the given [`Completion`] instead of doing the work again.
    Observed(Completion<V>),
}

/// Atomically reserve `key` in `map`, or observe an existing reservation.
pub fn try_reserve<K, V>(map: &DashMap<K, Completion<V>>, key: K) -> Reservation<V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    match map.entry(key) {
        Entry::Occupied(existing) => Reservation::Observed(existing.get().clone()),
        Entry::Vacant(slot) => {
            let (tx, rx) = watch::channel(None);
            let completion = Completion { rx };
            slot.insert(completion.clone());
            Reservation::Reserved(Reserver { tx }, completion)
        }
    }
}
