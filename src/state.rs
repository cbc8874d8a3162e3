use std::collections::HashMap;

use crate::error::StateError;
use crate::event::KeyState;

/// One worker's slice of the keyed state.
///
/// A shard is owned by exactly one worker, so access is never contended;
/// durability comes from the explicit snapshot/restore byte interface, not
/// from anything the store does behind the caller's back.
#[derive(Debug, Default)]
pub struct StateShard {
    entries: HashMap<String, KeyState>,
}

/// A serialized shard plus the bookkeeping the checkpoint manifest wants.
#[derive(Debug, Clone)]
pub struct ShardSnapshot {
    pub index: usize,
    pub keys: usize,
    pub bytes: Vec<u8>,
}

impl StateShard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = KeyState>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|state| (state.key.clone(), state))
                .collect(),
        }
    }

    /// State for a key, created with a zero count on first sight.
    pub fn entry(&mut self, key: &str) -> &mut KeyState {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| KeyState::new(key.to_string()))
    }

    pub fn get(&self, key: &str) -> Option<&KeyState> {
        self.entries.get(key)
    }

    pub fn put(&mut self, state: KeyState) {
        self.entries.insert(state.key.clone(), state);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the live entries. Sorted by key, so identical state always
    /// produces identical bytes.
    pub fn snapshot(&self) -> Result<Vec<u8>, StateError> {
        let mut entries: Vec<&KeyState> = self.entries.values().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        bincode::serialize(&entries).map_err(StateError::Serialize)
    }

    /// Rebuild a shard from [`StateShard::snapshot`] bytes.
    pub fn restore(bytes: &[u8]) -> Result<Self, StateError> {
        Ok(Self::from_entries(Self::entries_from_snapshot(bytes)?))
    }

    /// Decode snapshot bytes into bare entries, for re-routing restored
    /// state across a different worker count.
    pub fn entries_from_snapshot(bytes: &[u8]) -> Result<Vec<KeyState>, StateError> {
        bincode::deserialize(bytes).map_err(StateError::Deserialize)
    }
}
