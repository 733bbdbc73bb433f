//! Map mutations as they are recorded in a map's mutation log

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::{Hash32, Result, VdsError};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MutationAction {
    Set {
        #[serde(with = "hex")]
        value: Vec<u8>,
    },
    Delete,
    /// Set only if the key currently holds `previous_leaf_hash`.
    Update {
        #[serde(with = "hex")]
        value: Vec<u8>,
        #[serde(with = "hex")]
        previous_leaf_hash: Hash32,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapMutation {
    /// Nanoseconds since the unix epoch.
    pub timestamp: i64,
    #[serde(with = "hex")]
    pub key: Vec<u8>,
    pub action: MutationAction,
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

impl MapMutation {
    pub fn new(key: &[u8], action: MutationAction) -> Self {
        Self { timestamp: now_nanos(), key: key.to_vec(), action }
    }

    pub fn set(key: &[u8], value: &[u8]) -> Self {
        Self::new(key, MutationAction::Set { value: value.to_vec() })
    }

    pub fn delete(key: &[u8]) -> Self {
        Self::new(key, MutationAction::Delete)
    }

    pub fn update(key: &[u8], value: &[u8], previous_leaf_hash: Hash32) -> Self {
        Self::new(key, MutationAction::Update { value: value.to_vec(), previous_leaf_hash })
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Value written when the mutation applies; `None` for deletes.
    pub fn value(&self) -> Option<&[u8]> {
        match &self.action {
            MutationAction::Set { value } | MutationAction::Update { value, .. } => Some(value),
            MutationAction::Delete => None,
        }
    }

    /// Leaf hash the key should hold after this mutation, given what it holds now.
    pub fn next_leaf_hash(&self, prev: &Hash32) -> Hash32 {
        match &self.action {
            MutationAction::Set { value } => crypto::leaf_hash(value),
            MutationAction::Delete => crypto::null_leaf_hash(),
            MutationAction::Update { value, previous_leaf_hash } => {
                if previous_leaf_hash == prev {
                    crypto::leaf_hash(value)
                } else {
                    *prev
                }
            }
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VdsError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| VdsError::Serialization(e.to_string()))
    }
}
