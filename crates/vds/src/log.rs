//! Append-only Merkle log and its proof engine
//!
//! A [`LogTree`] is a view of one log kind inside one namespace. It stores
//! every leaf hash plus the hash of every complete power-of-two subtree as
//! the tree grows; any other range is rebuilt on demand from those.

use tracing::{debug, info, warn};

use crate::crypto;
use crate::merkle::{self, is_pow2};
use crate::nodestore;
use crate::storage::{KeyReader, KeyWriter};
use crate::types::{
    AddEntryOutcome, ConsistencyProof, EntryIndex, Hash32, InclusionProof, LeafNode, LeafRef,
    LogKind, LogTreeHead, TreeNode,
};
use crate::{Result, VdsError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogTree {
    kind: LogKind,
}

impl LogTree {
    pub fn new(kind: LogKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> LogKind {
        self.kind
    }

    pub fn head<R: KeyReader + ?Sized>(&self, kr: &R) -> Result<LogTreeHead> {
        nodestore::lookup_tree_head(kr, self.kind)
    }

    /// Append `data` unless an identical entry was already sequenced.
    pub fn add_entry<W: KeyWriter + ?Sized>(
        &self,
        kw: &mut W,
        data: &[u8],
    ) -> Result<AddEntryOutcome> {
        let mtl = crypto::leaf_hash(data);
        if nodestore::lookup_index_by_leaf_hash(&*kw, self.kind, &mtl)?.is_some() {
            debug!(kind = ?self.kind, leaf = %hex::encode(mtl), "duplicate entry");
            return Ok(AddEntryOutcome { duplicate: true, new_head: None });
        }

        let n = self.head(&*kw)?.tree_size;
        nodestore::write_data_by_leaf_hash(kw, self.kind, &mtl, data)?;
        nodestore::write_leaf_node_by_index(kw, self.kind, &LeafNode { index: n, hash: mtl })?;
        nodestore::write_index_by_leaf_hash(kw, self.kind, &mtl, EntryIndex { index: n })?;

        // Pending complete subtrees to the left of the new leaf.
        let ranges = merkle::create_needed_stack(n);
        let hashes = self.fetch_sub_tree_hashes(&*kw, &ranges, true)?;
        let mut stack: Vec<((i64, i64), Hash32)> = ranges
            .into_iter()
            .zip(hashes)
            .map(|(r, h)| h.map(|h| (r, h)).ok_or(VdsError::NoSuchKey))
            .collect::<Result<_>>()?;
        stack.push(((n, n + 1), mtl));

        let mut carry = n;
        while carry & 1 == 1 {
            let ((_, end), right) = stack.pop().ok_or(VdsError::NoSuchKey)?;
            let ((start, _), left) = stack.pop().ok_or(VdsError::NoSuchKey)?;
            let hash = crypto::node_hash(&left, &right);
            nodestore::write_tree_node_by_range(
                kw,
                self.kind,
                &TreeNode { range_start: start, range_end: end, hash },
            )?;
            stack.push(((start, end), hash));
            carry >>= 1;
        }

        let mut pending = stack.into_iter().rev().map(|(_, h)| h);
        let mut root = pending.next().ok_or(VdsError::NoSuchKey)?;
        for left in pending {
            root = crypto::node_hash(&left, &root);
        }

        let head = LogTreeHead { tree_size: n + 1, root_hash: root };
        nodestore::write_root_hash_by_size(kw, self.kind, &head)?;
        nodestore::write_tree_head(kw, self.kind, &head)?;
        info!(
            kind = ?self.kind,
            tree_size = head.tree_size,
            root = %hex::encode(root),
            "appended entry"
        );

        Ok(AddEntryOutcome { duplicate: false, new_head: Some(head) })
    }

    /// Head for `tree_size`, 0 meaning the current head.
    pub fn tree_hash<R: KeyReader + ?Sized>(&self, kr: &R, tree_size: i64) -> Result<LogTreeHead> {
        let head = self.head(kr)?;
        if tree_size < 0 || tree_size > head.tree_size {
            return Err(VdsError::InvalidRange);
        }
        if tree_size == 0 || tree_size == head.tree_size {
            return Ok(head);
        }
        nodestore::lookup_root_hash_by_size(kr, self.kind, tree_size)
    }

    /// Raw entries `[first, last)`, at most `max_entries` of them.
    pub fn fetch_entries<R: KeyReader + ?Sized>(
        &self,
        kr: &R,
        first: i64,
        last: i64,
        max_entries: i64,
    ) -> Result<Vec<Vec<u8>>> {
        let size = self.head(kr)?.tree_size;
        let last = if last == 0 { size } else { last };
        if first < 0 || last > size || first >= last {
            return Err(VdsError::InvalidRange);
        }
        let last = last.min(first.saturating_add(max_entries.max(1)));
        debug!(kind = ?self.kind, first, last, "fetching entries");

        nodestore::lookup_leaf_nodes(kr, self.kind, first, last)?
            .iter()
            .map(|leaf| nodestore::lookup_data_by_leaf_hash(kr, self.kind, &leaf.hash))
            .collect()
    }

    // --- proofs ---

    /// Stored hashes for each range: leaves for width 1, tree nodes otherwise.
    pub fn fetch_sub_tree_hashes<R: KeyReader + ?Sized>(
        &self,
        kr: &R,
        ranges: &[(i64, i64)],
        fail_on_missing: bool,
    ) -> Result<Vec<Option<Hash32>>> {
        let mut rv = Vec::with_capacity(ranges.len());
        for &(start, end) in ranges {
            let hash = if end - start == 1 {
                nodestore::lookup_leaf_node_by_index(kr, self.kind, start)?.map(|n| n.hash)
            } else {
                nodestore::lookup_tree_node_by_range(kr, self.kind, start, end)?.map(|n| n.hash)
            };
            if hash.is_none() && fail_on_missing {
                return Err(VdsError::NoSuchKey);
            }
            rv.push(hash);
        }
        Ok(rv)
    }

    /// Hash of an arbitrary range, chained from its power-of-two chunks.
    pub fn calc_sub_tree_hash<R: KeyReader + ?Sized>(
        &self,
        kr: &R,
        start: i64,
        end: i64,
    ) -> Result<Hash32> {
        let chunks = merkle::power_of_two_chunks(start, end);
        let hashes = self.fetch_sub_tree_hashes(kr, &chunks, true)?;
        let mut iter = hashes.into_iter().rev().flatten();
        let mut rv = iter.next().ok_or(VdsError::InvalidRange)?;
        for left in iter {
            rv = crypto::node_hash(&left, &rv);
        }
        Ok(rv)
    }

    fn resolve_ranges<R: KeyReader + ?Sized>(
        &self,
        kr: &R,
        ranges: &[(i64, i64)],
    ) -> Result<Vec<Hash32>> {
        let hashes = self.fetch_sub_tree_hashes(kr, ranges, false)?;
        ranges
            .iter()
            .zip(hashes)
            .map(|(&(start, end), hash)| match hash {
                Some(h) => Ok(h),
                None if is_pow2(end - start) => {
                    warn!(kind = ?self.kind, start, end, "complete subtree missing from storage");
                    Err(VdsError::NotFound)
                }
                None => self.calc_sub_tree_hash(kr, start, end),
            })
            .collect()
    }

    pub fn inclusion_proof<R: KeyReader + ?Sized>(
        &self,
        kr: &R,
        leaf: LeafRef,
        tree_size: i64,
    ) -> Result<InclusionProof> {
        let head = self.head(kr)?;
        if tree_size < 0 || tree_size > head.tree_size {
            return Err(VdsError::InvalidRange);
        }
        let tree_size = if tree_size == 0 { head.tree_size } else { tree_size };

        let leaf_index = match leaf {
            LeafRef::Index(i) => i,
            LeafRef::Hash(h) => {
                nodestore::lookup_index_by_leaf_hash(kr, self.kind, &h)?
                    .ok_or(VdsError::NotFound)?
                    .index
            }
        };
        // Not yet durably sequenced reads the same as never added.
        if leaf_index < 0 || leaf_index >= head.tree_size {
            return Err(VdsError::NotFound);
        }
        if leaf_index >= tree_size {
            return Err(VdsError::InvalidRange);
        }

        let ranges = merkle::path(leaf_index, 0, tree_size);
        debug!(kind = ?self.kind, leaf_index, tree_size, ranges = ranges.len(), "inclusion proof");
        let audit_path = self.resolve_ranges(kr, &ranges)?;
        Ok(InclusionProof { leaf_index, tree_size, audit_path })
    }

    pub fn consistency_proof<R: KeyReader + ?Sized>(
        &self,
        kr: &R,
        first: i64,
        second: i64,
    ) -> Result<ConsistencyProof> {
        let head = self.head(kr)?;
        if first <= 0 || second < 0 {
            return Err(VdsError::InvalidRange);
        }
        let second = if second == 0 { head.tree_size } else { second };
        if second > head.tree_size || first >= second {
            return Err(VdsError::InvalidRange);
        }

        let ranges = merkle::sub_proof(first, 0, second, true);
        debug!(kind = ?self.kind, first, second, ranges = ranges.len(), "consistency proof");
        let audit_path = self.resolve_ranges(kr, &ranges)?;
        Ok(ConsistencyProof { first_size: first, second_size: second, audit_path })
    }
}
