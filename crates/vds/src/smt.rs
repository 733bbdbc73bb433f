//! Versioned sparse Merkle map
//!
//! A 256-level binary trie over `SHA-256(key)`, stored as path-compressed
//! nodes keyed by `(version, prefix)`. Mutation `m` writes only the nodes on
//! its own path at version `m + 1`; every other subtree stays where an older
//! version put it and is referenced by that version number. Missing subtrees
//! hash to the default leaf value of their depth.

use tracing::debug;

use crate::bpath::BitPath;
use crate::crypto::{self, default_leaf_value, MAP_DEPTH};
use crate::mutation::MapMutation;
use crate::nodestore;
use crate::storage::{KeyReader, KeyWriter};
use crate::types::{Hash32, MapBranch, MapNode};
use crate::Result;

/// Value proof material for one key at one map version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapLookup {
    pub audit_path: Vec<Option<Hash32>>,
    /// Null leaf hash when the key is absent.
    pub leaf_hash: Hash32,
}

/// Hash of `node` as the root of the subtree at `depth`.
pub fn calc_node_hash(node: &MapNode, depth: usize) -> Hash32 {
    match node {
        MapNode::Leaf(leaf) => {
            let mut h = leaf.leaf_hash;
            for i in (depth..MAP_DEPTH).rev() {
                let empty = default_leaf_value(i + 1);
                h = if leaf.remaining_path.bit_at(i - depth) {
                    crypto::node_hash(&empty, &h)
                } else {
                    crypto::node_hash(&h, &empty)
                };
            }
            h
        }
        MapNode::Branch(b) => {
            let empty = default_leaf_value(depth + 1);
            let left = if b.left_version == 0 { empty } else { b.left_hash };
            let right = if b.right_version == 0 { empty } else { b.right_hash };
            crypto::node_hash(&left, &right)
        }
    }
}

/// Follow `path` from the root of `version` until a leaf or an empty child.
/// Returns the node reached and every branch passed through on the way, so
/// the node reached sits at depth `ancestors.len()`.
pub fn descend_to_fork<R: KeyReader + ?Sized>(
    kr: &R,
    path: &BitPath,
    version: i64,
) -> Result<(MapNode, Vec<MapBranch>)> {
    let mut ancestors = Vec::new();
    let mut node = nodestore::lookup_map_node(kr, version, &BitPath::empty())?;
    while let MapNode::Branch(branch) = node {
        let depth = ancestors.len();
        let child_version = branch.child_version(path.bit_at(depth));
        if child_version == 0 {
            return Ok((MapNode::Branch(branch), ancestors));
        }
        ancestors.push(branch);
        node = nodestore::lookup_map_node(kr, child_version, &path.slice(0, depth + 1))?;
    }
    Ok((node, ancestors))
}

/// Root hash of the map at `version`.
pub fn root_hash<R: KeyReader + ?Sized>(kr: &R, version: i64) -> Result<Hash32> {
    let root = nodestore::lookup_map_node(kr, version, &BitPath::empty())?;
    Ok(calc_node_hash(&root, 0))
}

/// Apply `mutation` as mutation number `mutation_index`, writing version
/// `mutation_index + 1`. Returns the new root hash.
pub fn set_map_value<W: KeyWriter + ?Sized>(
    kw: &mut W,
    mutation_index: i64,
    mutation: &MapMutation,
) -> Result<Hash32> {
    let key_path = BitPath::from_key(&mutation.key);
    let version = mutation_index + 1;
    let null = crypto::null_leaf_hash();

    let (head, mut ancestors) = descend_to_fork(&*kw, &key_path, mutation_index)?;
    let depth = ancestors.len();

    let prev = match &head {
        MapNode::Leaf(leaf) if leaf.remaining_path == key_path.slice(depth, MAP_DEPTH) => {
            leaf.leaf_hash
        }
        _ => null,
    };
    let next = mutation.next_leaf_hash(&prev);

    if next == prev {
        debug!(version, "mutation leaves map unchanged");
        let root = nodestore::lookup_map_node(&*kw, mutation_index, &BitPath::empty())?;
        nodestore::write_map_node(kw, version, &BitPath::empty(), &root)?;
        return Ok(calc_node_hash(&root, 0));
    }

    if next != null {
        if let Some(value) = mutation.value() {
            nodestore::write_map_value(kw, &next, value)?;
        }
    }

    match head {
        // Same key, or a dead leaf we can take over in place.
        MapNode::Leaf(leaf) if prev != null || leaf.leaf_hash == null => {}
        MapNode::Leaf(leaf) => {
            // Another key lives here: push it down until our paths part.
            let their_path = BitPath::join(&key_path.slice(0, depth), &leaf.remaining_path);
            while their_path.bit_at(ancestors.len()) == key_path.bit_at(ancestors.len()) {
                ancestors.push(MapBranch::default());
            }
            let fork = ancestors.len();
            let moved = MapNode::leaf(leaf.leaf_hash, their_path.slice(fork + 1, MAP_DEPTH));
            nodestore::write_map_node(kw, version, &their_path.slice(0, fork + 1), &moved)?;

            let mut parent = MapBranch::default();
            let moved_hash = calc_node_hash(&moved, fork + 1);
            if their_path.bit_at(fork) {
                parent.right_version = version;
                parent.right_hash = moved_hash;
            } else {
                parent.left_version = version;
                parent.left_hash = moved_hash;
            }
            ancestors.push(parent);
        }
        MapNode::Branch(branch) => ancestors.push(branch),
    }

    let leaf_depth = ancestors.len();
    let leaf = MapNode::leaf(next, key_path.slice(leaf_depth, MAP_DEPTH));
    nodestore::write_map_node(kw, version, &key_path.slice(0, leaf_depth), &leaf)?;
    let leaf_hash = calc_node_hash(&leaf, leaf_depth);
    let root = write_ancestors(kw, version, &key_path, &ancestors, leaf_hash)?;

    debug!(version, leaf_depth, root = %hex::encode(root), "map updated");
    Ok(root)
}

/// Rewrite `ancestors` bottom-up at `version`, pointing each at the freshly
/// written child on `key_path` and keeping its other child by reference.
fn write_ancestors<W: KeyWriter + ?Sized>(
    kw: &mut W,
    version: i64,
    key_path: &BitPath,
    ancestors: &[MapBranch],
    child_hash: Hash32,
) -> Result<Hash32> {
    let mut cur = child_hash;
    for (depth, branch) in ancestors.iter().enumerate().rev() {
        let mut node = *branch;
        if key_path.bit_at(depth) {
            node.right_version = version;
            node.right_hash = cur;
        } else {
            node.left_version = version;
            node.left_hash = cur;
        }
        let node = MapNode::Branch(node);
        nodestore::write_map_node(kw, version, &key_path.slice(0, depth), &node)?;
        cur = calc_node_hash(&node, depth);
    }
    Ok(cur)
}

/// Audit path and leaf hash for `key` in the map at `version`.
pub fn get_value_proof<R: KeyReader + ?Sized>(
    kr: &R,
    key: &[u8],
    version: i64,
) -> Result<MapLookup> {
    let key_path = BitPath::from_key(key);
    let null = crypto::null_leaf_hash();

    let (head, ancestors) = descend_to_fork(kr, &key_path, version)?;
    let depth = ancestors.len();

    let mut audit_path: Vec<Option<Hash32>> = vec![None; MAP_DEPTH];
    for (i, branch) in ancestors.iter().enumerate() {
        audit_path[i] = branch.sibling(key_path.bit_at(i));
    }

    let leaf_hash = match head {
        MapNode::Leaf(leaf) if leaf.remaining_path == key_path.slice(depth, MAP_DEPTH) => {
            leaf.leaf_hash
        }
        MapNode::Leaf(leaf) => {
            if leaf.leaf_hash != null {
                // The neighbour's subtree becomes our sibling where the paths part.
                let their_path = BitPath::join(&key_path.slice(0, depth), &leaf.remaining_path);
                let fork = BitPath::common_prefix_length(&their_path, &key_path);
                let moved = MapNode::leaf(leaf.leaf_hash, their_path.slice(fork + 1, MAP_DEPTH));
                audit_path[fork] = Some(calc_node_hash(&moved, fork + 1));
            }
            null
        }
        MapNode::Branch(branch) => {
            audit_path[depth] = branch.sibling(key_path.bit_at(depth));
            null
        }
    };

    debug!(version, depth, present = leaf_hash != null, "map value proof");
    Ok(MapLookup { audit_path, leaf_hash })
}
