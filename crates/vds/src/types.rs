//! Core types for verifiable data structures

use serde::{Deserialize, Serialize};

use crate::bpath::BitPath;

/// 32-byte hash
pub type Hash32 = [u8; 32];

/// Which of the three log flavours a [`LogRef`] points at.
///
/// All three run the same algorithms; they only differ in bucket names and
/// in the permissions needed to touch them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogKind {
    /// Plain append-only log written by clients.
    User,
    /// Every mutation ever submitted to a map, in order.
    Mutation,
    /// One map tree head per mutation.
    TreeHead,
}

impl LogKind {
    pub(crate) fn bucket_prefix(self) -> &'static str {
        match self {
            LogKind::User => "user",
            LogKind::Mutation => "mutation",
            LogKind::TreeHead => "treehead",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRef {
    pub account: String,
    pub name: String,
    pub kind: LogKind,
}

impl LogRef {
    pub fn user(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self { account: account.into(), name: name.into(), kind: LogKind::User }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapRef {
    pub account: String,
    pub name: String,
}

impl MapRef {
    pub fn new(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self { account: account.into(), name: name.into() }
    }

    pub fn mutation_log(&self) -> LogRef {
        LogRef { account: self.account.clone(), name: self.name.clone(), kind: LogKind::Mutation }
    }

    pub fn tree_head_log(&self) -> LogRef {
        LogRef { account: self.account.clone(), name: self.name.clone(), kind: LogKind::TreeHead }
    }
}

/// Leaf hash stored at a log position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode {
    pub index: i64,
    pub hash: Hash32,
}

/// Hash of the complete power-of-two subtree `[range_start, range_end)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub range_start: i64,
    pub range_end: i64,
    pub hash: Hash32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTreeHead {
    pub tree_size: i64,
    #[serde(with = "hex")]
    pub root_hash: Hash32,
}

/// Position a leaf hash was first sequenced at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryIndex {
    pub index: i64,
}

/// Result of appending one leaf to a log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddEntryOutcome {
    pub duplicate: bool,
    /// Set when the append grew the tree.
    pub new_head: Option<LogTreeHead>,
}

/// Interior record of the sparse map. A zero version marks an empty child.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapBranch {
    pub left_version: i64,
    pub left_hash: Hash32,
    pub right_version: i64,
    pub right_hash: Hash32,
}

impl MapBranch {
    /// Version of the child on the side `right` selects.
    pub fn child_version(&self, right: bool) -> i64 {
        if right {
            self.right_version
        } else {
            self.left_version
        }
    }

    /// Hash of the child opposite to `right`, `None` when that side is empty.
    pub fn sibling(&self, right: bool) -> Option<Hash32> {
        let (version, hash) = if right {
            (self.left_version, self.left_hash)
        } else {
            (self.right_version, self.right_hash)
        };
        (version != 0).then_some(hash)
    }
}

/// Path-compressed leaf: `remaining_path` holds the key bits below its depth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLeaf {
    pub leaf_hash: Hash32,
    pub remaining_path: BitPath,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapNode {
    Leaf(MapLeaf),
    Branch(MapBranch),
}

impl MapNode {
    pub fn leaf(leaf_hash: Hash32, remaining_path: BitPath) -> Self {
        MapNode::Leaf(MapLeaf { leaf_hash, remaining_path })
    }

    /// Root of the map before any mutation.
    pub fn empty() -> Self {
        MapNode::Branch(MapBranch::default())
    }
}

/// Selects the leaf an inclusion proof is wanted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeafRef {
    Index(i64),
    Hash(Hash32),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEntryResponse {
    #[serde(with = "hex")]
    pub leaf_hash: Hash32,
    pub duplicate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub leaf_index: i64,
    pub tree_size: i64,
    /// Sibling hashes, leaf to root.
    pub audit_path: Vec<Hash32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyProof {
    pub first_size: i64,
    pub second_size: i64,
    pub audit_path: Vec<Hash32>,
}

/// Map value with its 256-entry audit path (index = trie depth).
/// `None` entries stand for the default value of an empty subtree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapValueProof {
    pub tree_size: i64,
    pub audit_path: Vec<Option<Hash32>>,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapTreeHead {
    #[serde(with = "hex")]
    pub root_hash: Hash32,
    pub mutation_log: LogTreeHead,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSetResponse {
    /// Leaf hash of the mutation entry in the map's mutation log.
    #[serde(with = "hex")]
    pub leaf_hash: Hash32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub head: LogTreeHead,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}
