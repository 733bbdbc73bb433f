//! Domain-separated Merkle hashing (RFC 6962 style)

use std::sync::LazyLock;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Hash32, Result, VdsError};

const DOMAIN_LEAF: u8 = 0x00;
const DOMAIN_INTERNAL: u8 = 0x01;

/// Number of levels in the sparse map.
pub const MAP_DEPTH: usize = 256;

/// leaf = H(0x00 || data)
pub fn leaf_hash(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update([DOMAIN_LEAF]);
    hasher.update(data);
    hasher.finalize().into()
}

/// node = H(0x01 || left || right)
pub fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update([DOMAIN_INTERNAL]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root hash of a log with no entries, H("").
pub fn empty_tree_hash() -> Hash32 {
    Sha256::digest(b"").into()
}

/// Leaf hash of an absent (or deleted) map value.
pub fn null_leaf_hash() -> Hash32 {
    DEFAULT_LEAF_VALUES[MAP_DEPTH]
}

/// Hash of an empty subtree rooted at each depth, `[256]` being a single empty leaf.
static DEFAULT_LEAF_VALUES: LazyLock<Vec<Hash32>> = LazyLock::new(|| {
    let mut rv = vec![[0u8; 32]; MAP_DEPTH + 1];
    rv[MAP_DEPTH] = leaf_hash(&[]);
    for depth in (0..MAP_DEPTH).rev() {
        rv[depth] = node_hash(&rv[depth + 1], &rv[depth + 1]);
    }
    rv
});

/// Default value for an empty subtree whose root sits at `depth` (0 = map root).
pub fn default_leaf_value(depth: usize) -> Hash32 {
    DEFAULT_LEAF_VALUES[depth]
}

/// Derive a storage namespace from a serializable identity tuple.
pub fn namespace_digest<T: Serialize>(identity: &T) -> Result<Hash32> {
    let bytes = bincode::serialize(identity).map_err(|e| VdsError::Serialization(e.to_string()))?;
    Ok(blake3::hash(&bytes).into())
}
