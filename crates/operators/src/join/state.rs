//! Per-key buffers for the two sides of a continuous equi-join.

use anyhow::Result;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use tandem_core::{Timestamp, Timestamped};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyState<L, R> {
    left: Vec<Timestamped<L>>,
    right: Vec<Timestamped<R>>,
}

impl<L, R> Default for KeyState<L, R> {
    fn default() -> Self {
        Self {
            left: Vec::new(),
            right: Vec::new(),
        }
    }
}

impl<L, R> KeyState<L, R> {
    fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

/// Unmatched-and-matched records of both join inputs, keyed by join key.
///
/// Neither side is consumed by a match: a left record stays to meet later
/// right records and vice versa. Entries leave only through
/// [`JoinState::evict_before`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "K: Serialize + Eq + Hash, L: Serialize, R: Serialize",
    deserialize = "K: DeserializeOwned + Eq + Hash, L: DeserializeOwned, R: DeserializeOwned"
))]
pub struct JoinState<K, L, R> {
    keys: HashMap<K, KeyState<L, R>>,
}

impl<K, L, R> Default for JoinState<K, L, R> {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }
}

impl<K, L, R> JoinState<K, L, R>
where
    K: Eq + Hash,
    L: Clone,
    R: Clone + PartialEq,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a left record and return the right records it matches.
    ///
    /// A left record whose origin is already buffered under the key was
    /// replayed after a restart; it still matches but is not stored again.
    pub fn insert_left(&mut self, key: K, entry: Timestamped<L>) -> Vec<R> {
        let state = self.keys.entry(key).or_default();
        let matches = state.right.iter().map(|r| r.value.clone()).collect();
        if !is_replay(&state.left, &entry) {
            state.left.push(entry);
        }
        matches
    }

    /// Buffer a right record and return the left records it matches.
    ///
    /// A right record equal to one already buffered under the key only
    /// refreshes that entry's timestamp.
    pub fn insert_right(&mut self, key: K, entry: Timestamped<R>) -> Vec<L> {
        let state = self.keys.entry(key).or_default();
        let matches = state.left.iter().map(|l| l.value.clone()).collect();
        match state.right.iter_mut().find(|r| r.value == entry.value) {
            Some(existing) => existing.ts = existing.ts.max(entry.ts),
            None => state.right.push(entry),
        }
        matches
    }

    /// Drop every entry older than `cutoff`; returns how many were dropped.
    pub fn evict_before(&mut self, cutoff: Timestamp) -> usize {
        let mut evicted = 0;
        self.keys.retain(|_, state| {
            let before = state.left.len() + state.right.len();
            state.left.retain(|e| e.ts >= cutoff);
            state.right.retain(|e| e.ts >= cutoff);
            evicted += before - state.left.len() - state.right.len();
            !state.is_empty()
        });
        evicted
    }

    /// Keep only the keys accepted by `owns`.
    pub fn retain_keys(&mut self, mut owns: impl FnMut(&K) -> bool) {
        self.keys.retain(|k, _| owns(k));
    }

    /// Fold another state into this one, e.g. when restoring several snapshots.
    pub fn merge(&mut self, other: JoinState<K, L, R>) {
        for (key, state) in other.keys {
            let entry = self.keys.entry(key).or_default();
            for l in state.left {
                if !is_replay(&entry.left, &l) {
                    entry.left.push(l);
                }
            }
            for r in state.right {
                match entry.right.iter_mut().find(|e| e.value == r.value) {
                    Some(existing) => existing.ts = existing.ts.max(r.ts),
                    None => entry.right.push(r),
                }
            }
        }
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// (left entries, right entries) across all keys.
    pub fn len(&self) -> (usize, usize) {
        self.keys
            .values()
            .fold((0, 0), |(l, r), s| (l + s.left.len(), r + s.right.len()))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn is_replay<T>(buffered: &[Timestamped<T>], entry: &Timestamped<T>) -> bool {
    entry.origin.is_some() && buffered.iter().any(|e| e.origin == entry.origin)
}

impl<K, L, R> JoinState<K, L, R>
where
    K: Eq + Hash + Serialize + DeserializeOwned,
    L: Serialize + DeserializeOwned,
    R: Serialize + DeserializeOwned,
{
    pub fn snapshot(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn restore(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}
