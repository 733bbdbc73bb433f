//! Client-side proof verification
//!
//! Nothing here touches storage: every check recomputes a root from the proof
//! and compares it with a tree head the caller already trusts. Auditors
//! rebuild logs and maps from their raw entries in memory.

use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};

use crate::bpath::BitPath;
use crate::crypto::{self, default_leaf_value, MAP_DEPTH};
use crate::mutation::MapMutation;
use crate::smt;
use crate::types::{
    ConsistencyProof, Hash32, InclusionProof, LogTreeHead, MapNode, MapTreeHead, MapValueProof,
    SignedTreeHead,
};
use crate::{Result, VdsError};

fn check(ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(VdsError::VerificationFailed)
    }
}

/// Check that `leaf_hash` sits at `proof.leaf_index` in the tree `head` describes.
pub fn verify_inclusion(
    proof: &InclusionProof,
    leaf_hash: &Hash32,
    head: &LogTreeHead,
) -> Result<()> {
    check(proof.tree_size == head.tree_size)?;
    check(proof.leaf_index >= 0 && proof.leaf_index < proof.tree_size)?;

    let mut fi = proof.leaf_index;
    let mut si = proof.tree_size - 1;
    let mut r = *leaf_hash;
    for p in &proof.audit_path {
        check(si != 0)?;
        if fi & 1 == 1 || fi == si {
            r = crypto::node_hash(p, &r);
            while fi & 1 == 0 && fi != 0 {
                fi >>= 1;
                si >>= 1;
            }
        } else {
            r = crypto::node_hash(&r, p);
        }
        fi >>= 1;
        si >>= 1;
    }
    check(si == 0 && r == head.root_hash)
}

/// Check that `second` is an append-only extension of `first`.
pub fn verify_consistency(
    proof: &ConsistencyProof,
    first: &LogTreeHead,
    second: &LogTreeHead,
) -> Result<()> {
    check(proof.first_size == first.tree_size && proof.second_size == second.tree_size)?;
    check(first.tree_size > 0 && first.tree_size < second.tree_size)?;

    let mut path: Vec<Hash32> = Vec::with_capacity(proof.audit_path.len() + 1);
    if crate::merkle::is_pow2(first.tree_size) {
        path.push(first.root_hash);
    }
    path.extend_from_slice(&proof.audit_path);
    check(!path.is_empty())?;

    let mut fi = first.tree_size - 1;
    let mut si = second.tree_size - 1;
    while fi & 1 == 1 {
        fi >>= 1;
        si >>= 1;
    }

    let mut fr = path[0];
    let mut sr = path[0];
    for c in &path[1..] {
        check(si != 0)?;
        if fi & 1 == 1 || fi == si {
            fr = crypto::node_hash(c, &fr);
            sr = crypto::node_hash(c, &sr);
            while fi & 1 == 0 && fi != 0 {
                fi >>= 1;
                si >>= 1;
            }
        } else {
            sr = crypto::node_hash(&sr, c);
        }
        fi >>= 1;
        si >>= 1;
    }
    check(si == 0 && fr == first.root_hash && sr == second.root_hash)
}

/// Root implied by a map audit path for `key` holding `leaf_hash`.
pub fn map_root_from_path(
    key: &[u8],
    leaf_hash: &Hash32,
    audit_path: &[Option<Hash32>],
) -> Result<Hash32> {
    check(audit_path.len() == MAP_DEPTH)?;
    let path = BitPath::from_key(key);
    let mut h = *leaf_hash;
    for i in (0..MAP_DEPTH).rev() {
        let sib = audit_path[i].unwrap_or_else(|| default_leaf_value(i + 1));
        h = if path.bit_at(i) { crypto::node_hash(&sib, &h) } else { crypto::node_hash(&h, &sib) };
    }
    Ok(h)
}

/// Check a map value (or its absence) against a map tree head.
pub fn verify_map_value(proof: &MapValueProof, key: &[u8], head: &MapTreeHead) -> Result<()> {
    check(proof.tree_size == head.mutation_log.tree_size)?;
    let leaf_hash = match &proof.value {
        Some(v) => crypto::leaf_hash(v),
        None => crypto::null_leaf_hash(),
    };
    check(map_root_from_path(key, &leaf_hash, &proof.audit_path)? == head.root_hash)
}

/// Bytes a tree head signature covers.
pub fn tree_head_signing_bytes(head: &LogTreeHead) -> Result<Vec<u8>> {
    bincode::serialize(head).map_err(|e| VdsError::Serialization(e.to_string()))
}

pub fn verify_signed_tree_head(sth: &SignedTreeHead, vk: &VerifyingKey) -> Result<()> {
    let bytes = tree_head_signing_bytes(&sth.head)?;
    let sig = Signature::from_slice(&sth.signature).map_err(|_| VdsError::VerificationFailed)?;
    vk.verify(&bytes, &sig).map_err(|_| VdsError::VerificationFailed)
}

/// Complete subtrees covering a log prefix, widest first. Appending a leaf
/// merges equal-width neighbours, so widths stay strictly decreasing.
#[derive(Clone, Debug, Default)]
struct Frontier {
    stack: Vec<(i64, Hash32)>,
}

impl Frontier {
    /// Seed from the hashes of the complete subtrees of a log of `size`
    /// leaves, widest first.
    fn from_subtrees(size: i64, hashes: impl IntoIterator<Item = Hash32>) -> Result<Self> {
        let widths = (0..63).rev().map(|bit| 1i64 << bit).filter(|w| size & w != 0);
        let stack: Vec<(i64, Hash32)> = widths.zip(hashes).collect();
        check(stack.len() == size.count_ones() as usize)?;
        Ok(Self { stack })
    }

    fn push(&mut self, leaf_hash: Hash32) {
        let mut cur = (1i64, leaf_hash);
        while let Some(&(width, left)) = self.stack.last() {
            if width != cur.0 {
                break;
            }
            self.stack.pop();
            cur = (width * 2, crypto::node_hash(&left, &cur.1));
        }
        self.stack.push(cur);
    }

    fn root(&self) -> Hash32 {
        let mut iter = self.stack.iter().rev();
        match iter.next() {
            None => crypto::empty_tree_hash(),
            Some(&(_, last)) => iter.fold(last, |root, (_, left)| crypto::node_hash(left, &root)),
        }
    }
}

/// Rebuild a log from all of its entries and compare with `head`.
pub fn verify_log_entries<T: AsRef<[u8]>>(entries: &[T], head: &LogTreeHead) -> Result<()> {
    check(entries.len() as i64 == head.tree_size)?;

    let mut frontier = Frontier::default();
    for entry in entries {
        frontier.push(crypto::leaf_hash(entry.as_ref()));
    }
    check(frontier.root() == head.root_hash)
}

/// Check that `entries` are exactly the leaves appended between `prev` and
/// `head`, without refetching what `prev` already covers.
///
/// `boundary` is the inclusion proof of leaf `prev.tree_size` in a tree of
/// `prev.tree_size + 1`; its audit path is the set of complete subtrees that
/// make up `prev`.
pub fn verify_log_extension<T: AsRef<[u8]>>(
    prev: &LogTreeHead,
    boundary: &InclusionProof,
    entries: &[T],
    head: &LogTreeHead,
) -> Result<()> {
    if prev.tree_size == 0 {
        return verify_log_entries(entries, head);
    }
    check(prev.tree_size < head.tree_size)?;
    check(entries.len() as i64 == head.tree_size - prev.tree_size)?;
    check(boundary.leaf_index == prev.tree_size && boundary.tree_size == prev.tree_size + 1)?;

    let subtrees = boundary.audit_path.iter().rev().copied();
    let mut frontier = Frontier::from_subtrees(prev.tree_size, subtrees)?;
    check(boundary.audit_path.len() == frontier.stack.len())?;
    check(frontier.root() == prev.root_hash)?;

    for entry in entries {
        frontier.push(crypto::leaf_hash(entry.as_ref()));
    }
    check(frontier.root() == head.root_hash)
}

/// In-memory trie the map auditor replays mutations into. Leaves keep their
/// full key path; a branch caches its hash.
#[derive(Debug, Default)]
enum AuditNode {
    #[default]
    Empty,
    Leaf {
        leaf_hash: Hash32,
        path: BitPath,
    },
    Branch {
        left: Box<AuditNode>,
        right: Box<AuditNode>,
        hash: Hash32,
    },
}

impl AuditNode {
    fn hash(&self, depth: usize) -> Hash32 {
        match self {
            AuditNode::Empty => default_leaf_value(depth),
            AuditNode::Leaf { leaf_hash, path } => {
                smt::calc_node_hash(&MapNode::leaf(*leaf_hash, path.slice(depth, MAP_DEPTH)), depth)
            }
            AuditNode::Branch { hash, .. } => *hash,
        }
    }

    fn lookup(&self, depth: usize, key_path: &BitPath) -> Hash32 {
        match self {
            AuditNode::Leaf { leaf_hash, path } if path == key_path => *leaf_hash,
            AuditNode::Branch { left, right, .. } => {
                let child = if key_path.bit_at(depth) { right } else { left };
                child.lookup(depth + 1, key_path)
            }
            _ => crypto::null_leaf_hash(),
        }
    }

    fn insert(&mut self, depth: usize, key_path: &BitPath, leaf_hash: Hash32) {
        match self {
            AuditNode::Empty => {
                *self = AuditNode::Leaf { leaf_hash, path: key_path.clone() };
            }
            AuditNode::Leaf { leaf_hash: theirs, path } => {
                if path == key_path || *theirs == crypto::null_leaf_hash() {
                    *self = AuditNode::Leaf { leaf_hash, path: key_path.clone() };
                } else {
                    let (their_hash, their_path) = (*theirs, path.clone());
                    *self = AuditNode::Branch {
                        left: Box::default(),
                        right: Box::default(),
                        hash: default_leaf_value(depth),
                    };
                    self.insert(depth, &their_path, their_hash);
                    self.insert(depth, key_path, leaf_hash);
                }
            }
            AuditNode::Branch { left, right, hash } => {
                if key_path.bit_at(depth) {
                    right.insert(depth + 1, key_path, leaf_hash);
                } else {
                    left.insert(depth + 1, key_path, leaf_hash);
                }
                *hash = crypto::node_hash(&left.hash(depth + 1), &right.hash(depth + 1));
            }
        }
    }
}

/// Replays a map's mutation log and remembers the map root and mutation log
/// head after every mutation, so tree heads the server published can be
/// checked against them.
#[derive(Debug, Default)]
pub struct MapAuditor {
    root: AuditNode,
    mutation_log: Frontier,
    map_roots: Vec<Hash32>,
    log_heads: Vec<Hash32>,
}

impl MapAuditor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutations replayed so far.
    pub fn size(&self) -> i64 {
        self.map_roots.len() as i64
    }

    /// Tree head after the last replayed mutation.
    pub fn head(&self) -> MapTreeHead {
        MapTreeHead {
            root_hash: self.root.hash(0),
            mutation_log: LogTreeHead {
                tree_size: self.size(),
                root_hash: self.mutation_log.root(),
            },
        }
    }

    /// Apply the next raw mutation log entry. Returns the new map root.
    pub fn add_mutation(&mut self, entry: &[u8]) -> Result<Hash32> {
        let mutation = MapMutation::from_json(entry).map_err(|_| VdsError::VerificationFailed)?;
        let key_path = BitPath::from_key(&mutation.key);
        let prev = self.root.lookup(0, &key_path);
        let next = mutation.next_leaf_hash(&prev);
        if next != prev {
            self.root.insert(0, &key_path, next);
        }

        self.mutation_log.push(crypto::leaf_hash(entry));
        let root = self.root.hash(0);
        self.map_roots.push(root);
        self.log_heads.push(self.mutation_log.root());
        Ok(root)
    }

    /// Check a published map tree head against the replayed state.
    pub fn check_tree_head(&self, head: &MapTreeHead) -> Result<()> {
        let size = head.mutation_log.tree_size;
        if size == 0 {
            let empty_log = head.mutation_log.root_hash == crypto::empty_tree_hash();
            return check(empty_log && head.root_hash == default_leaf_value(0));
        }
        check(size > 0 && size <= self.size())?;
        let idx = (size - 1) as usize;
        check(self.map_roots[idx] == head.root_hash)?;
        check(self.log_heads[idx] == head.mutation_log.root_hash)
    }
}

/// Audit a map from its two logs: replay every mutation log entry, then check
/// that each tree head log entry names the root the replay produced at that
/// size. Returns the head after the last mutation.
pub fn verify_map_history<M, H>(mutations: &[M], tree_heads: &[H]) -> Result<MapTreeHead>
where
    M: AsRef<[u8]>,
    H: AsRef<[u8]>,
{
    let mut auditor = MapAuditor::new();
    for entry in mutations {
        auditor.add_mutation(entry.as_ref())?;
    }
    for entry in tree_heads {
        let head: MapTreeHead =
            serde_json::from_slice(entry.as_ref()).map_err(|_| VdsError::VerificationFailed)?;
        auditor.check_tree_head(&head)?;
    }
    Ok(auditor.head())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_leaf_inclusion_has_empty_path() {
        let leaf = crypto::leaf_hash(b"only");
        let head = LogTreeHead { tree_size: 1, root_hash: leaf };
        let proof = InclusionProof { leaf_index: 0, tree_size: 1, audit_path: vec![] };
        assert!(verify_inclusion(&proof, &leaf, &head).is_ok());

        let long = InclusionProof { audit_path: vec![[0u8; 32]], ..proof };
        assert_eq!(verify_inclusion(&long, &leaf, &head), Err(VdsError::VerificationFailed));
    }

    #[test]
    fn test_inclusion_rejects_mismatched_size() {
        let leaf = crypto::leaf_hash(b"x");
        let head = LogTreeHead { tree_size: 2, root_hash: leaf };
        let proof = InclusionProof { leaf_index: 0, tree_size: 1, audit_path: vec![] };
        assert_eq!(verify_inclusion(&proof, &leaf, &head), Err(VdsError::VerificationFailed));
    }

    #[test]
    fn test_log_entries_two_and_three() {
        let (a, b, c) = (crypto::leaf_hash(b"a"), crypto::leaf_hash(b"b"), crypto::leaf_hash(b"c"));
        let ab = crypto::node_hash(&a, &b);
        let abc = crypto::node_hash(&ab, &c);
        let head2 = LogTreeHead { tree_size: 2, root_hash: ab };
        let head3 = LogTreeHead { tree_size: 3, root_hash: abc };
        assert!(verify_log_entries(&[b"a", b"b"], &head2).is_ok());
        assert!(verify_log_entries(&[b"a", b"b", b"c"], &head3).is_ok());
        assert!(verify_log_entries(&[b"a", b"c", b"b"], &head3).is_err());

        let empty: [&[u8]; 0] = [];
        let head = LogTreeHead { tree_size: 0, root_hash: crypto::empty_tree_hash() };
        assert!(verify_log_entries(&empty, &head).is_ok());
    }

    #[test]
    fn test_consistency_rejects_oversized_heads() {
        let first = LogTreeHead { tree_size: (1 << 62) + 1, root_hash: [1; 32] };
        let second = LogTreeHead { tree_size: (1 << 62) + 2, root_hash: [2; 32] };
        let proof = ConsistencyProof {
            first_size: first.tree_size,
            second_size: second.tree_size,
            audit_path: vec![[3; 32]; 2],
        };
        assert_eq!(verify_consistency(&proof, &first, &second), Err(VdsError::VerificationFailed));

        let last = LogTreeHead { tree_size: i64::MAX, root_hash: [2; 32] };
        let proof = ConsistencyProof { second_size: i64::MAX, ..proof };
        assert_eq!(verify_consistency(&proof, &first, &last), Err(VdsError::VerificationFailed));
    }

    #[test]
    fn test_log_extension_from_frontier() {
        let leaves: Vec<Hash32> =
            [b"a", b"b", b"c", b"d"].iter().map(|e| crypto::leaf_hash(*e)).collect();
        let ab = crypto::node_hash(&leaves[0], &leaves[1]);
        let abc = crypto::node_hash(&ab, &leaves[2]);
        let cd = crypto::node_hash(&leaves[2], &leaves[3]);
        let abcd = crypto::node_hash(&ab, &cd);

        // Leaf 3 of a four-leaf tree is proven by [c, ab].
        let prev = LogTreeHead { tree_size: 3, root_hash: abc };
        let head = LogTreeHead { tree_size: 4, root_hash: abcd };
        let boundary =
            InclusionProof { leaf_index: 3, tree_size: 4, audit_path: vec![leaves[2], ab] };
        assert!(verify_log_extension(&prev, &boundary, &[b"d"], &head).is_ok());
        assert!(verify_log_extension(&prev, &boundary, &[b"x"], &head).is_err());

        let short = InclusionProof { audit_path: vec![leaves[2]], ..boundary.clone() };
        assert!(verify_log_extension(&prev, &short, &[b"d"], &head).is_err());
        let wrong_prev = LogTreeHead { root_hash: ab, ..prev };
        assert!(verify_log_extension(&wrong_prev, &boundary, &[b"d"], &head).is_err());
    }

    #[test]
    fn test_map_auditor_tracks_roots() {
        let mut auditor = MapAuditor::new();
        assert_eq!(auditor.head().root_hash, default_leaf_value(0));

        let set = MapMutation::set(b"k", b"v").with_timestamp(1).to_json().unwrap();
        let root = auditor.add_mutation(&set).unwrap();
        let expected = smt::calc_node_hash(
            &MapNode::leaf(crypto::leaf_hash(b"v"), BitPath::from_key(b"k")),
            0,
        );
        assert_eq!(root, expected);

        let delete = MapMutation::delete(b"k").with_timestamp(2).to_json().unwrap();
        assert_eq!(auditor.add_mutation(&delete).unwrap(), default_leaf_value(0));
        assert_eq!(auditor.size(), 2);

        let head = auditor.head();
        assert!(auditor.check_tree_head(&head).is_ok());
        let stale = MapTreeHead { root_hash: expected, ..head };
        assert_eq!(auditor.check_tree_head(&stale), Err(VdsError::VerificationFailed));

        assert_eq!(auditor.add_mutation(b"not json"), Err(VdsError::VerificationFailed));
    }

    #[test]
    fn test_empty_map_absence() {
        let head = MapTreeHead {
            root_hash: default_leaf_value(0),
            mutation_log: LogTreeHead { tree_size: 0, root_hash: crypto::empty_tree_hash() },
        };
        let proof = MapValueProof { tree_size: 0, audit_path: vec![None; MAP_DEPTH], value: None };
        assert!(verify_map_value(&proof, b"anything", &head).is_ok());

        let present = MapValueProof { value: Some(b"v".to_vec()), ..proof.clone() };
        let rv = verify_map_value(&present, b"anything", &head);
        assert_eq!(rv, Err(VdsError::VerificationFailed));

        let short = MapValueProof { audit_path: vec![None; 3], ..proof };
        assert_eq!(verify_map_value(&short, b"anything", &head), Err(VdsError::VerificationFailed));
    }
}
