//! Bucket layout and typed record access
//!
//! Each log kind gets its own family of buckets (`user_leaf`, `mutation_node`,
//! ...), so a map's mutation log and tree-head log can share the map's
//! namespace without colliding. Integer keys are big-endian so that byte order
//! matches numeric order for range scans.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bpath::BitPath;
use crate::crypto;
use crate::storage::{KeyReader, KeyWriter};
use crate::types::{EntryIndex, Hash32, LeafNode, LogKind, LogTreeHead, MapNode, TreeNode};
use crate::{Result, VdsError};

const DATA_BY_LEAF_HASH: &str = "data";
const LEAF_NODE_BY_INDEX: &str = "leaf";
const TREE_NODE_BY_RANGE: &str = "node";
const ROOT_HASH_BY_SIZE: &str = "tree";
const INDEX_BY_LEAF_HASH: &str = "index";
const HEAD: &str = "head";

const CURRENT_HEAD_KEY: &[u8] = b"current";

const MAP_NODE_BUCKET: &[u8] = b"map_node";
const MAP_DATA_BUCKET: &[u8] = b"map_data";

/// Account namespace buckets naming the logs and maps that were created.
pub(crate) const LOGS_BUCKET: &[u8] = b"logs";
pub(crate) const MAPS_BUCKET: &[u8] = b"maps";

fn bucket(kind: LogKind, suffix: &str) -> Vec<u8> {
    format!("{}_{}", kind.bucket_prefix(), suffix).into_bytes()
}

fn to_int_binary(i: i64) -> [u8; 8] {
    (i as u64).to_be_bytes()
}

fn to_double_int_binary(a: i64, b: i64) -> [u8; 16] {
    let mut rv = [0u8; 16];
    rv[..8].copy_from_slice(&to_int_binary(a));
    rv[8..].copy_from_slice(&to_int_binary(b));
    rv
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| VdsError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| VdsError::Serialization(e.to_string()))
}

fn read_record<R, T>(kr: &R, bucket: &[u8], key: &[u8]) -> Result<Option<T>>
where
    R: KeyReader + ?Sized,
    T: DeserializeOwned,
{
    kr.get(bucket, key)?.map(|b| decode(&b)).transpose()
}

fn write_record<W, T>(kw: &mut W, bucket: &[u8], key: &[u8], value: &T) -> Result<()>
where
    W: KeyWriter + ?Sized,
    T: Serialize,
{
    let bytes = encode(value)?;
    kw.set(bucket, key, Some(&bytes))
}

// --- log records ---

pub fn write_data_by_leaf_hash<W: KeyWriter + ?Sized>(
    kw: &mut W,
    kind: LogKind,
    leaf_hash: &Hash32,
    data: &[u8],
) -> Result<()> {
    kw.set(&bucket(kind, DATA_BY_LEAF_HASH), leaf_hash, Some(data))
}

pub fn lookup_data_by_leaf_hash<R: KeyReader + ?Sized>(
    kr: &R,
    kind: LogKind,
    leaf_hash: &Hash32,
) -> Result<Vec<u8>> {
    kr.get(&bucket(kind, DATA_BY_LEAF_HASH), leaf_hash)?.ok_or(VdsError::NoSuchKey)
}

pub fn write_leaf_node_by_index<W: KeyWriter + ?Sized>(
    kw: &mut W,
    kind: LogKind,
    node: &LeafNode,
) -> Result<()> {
    write_record(kw, &bucket(kind, LEAF_NODE_BY_INDEX), &to_int_binary(node.index), node)
}

pub fn lookup_leaf_node_by_index<R: KeyReader + ?Sized>(
    kr: &R,
    kind: LogKind,
    index: i64,
) -> Result<Option<LeafNode>> {
    read_record(kr, &bucket(kind, LEAF_NODE_BY_INDEX), &to_int_binary(index))
}

/// Leaf nodes `[first, last)` in index order, failing if any is missing.
pub fn lookup_leaf_nodes<R: KeyReader + ?Sized>(
    kr: &R,
    kind: LogKind,
    first: i64,
    last: i64,
) -> Result<Vec<LeafNode>> {
    if first >= last {
        return Ok(Vec::new());
    }
    let rows = kr.range(
        &bucket(kind, LEAF_NODE_BY_INDEX),
        &to_int_binary(first),
        &to_int_binary(last - 1),
    )?;
    if rows.len() as i64 != last - first {
        return Err(VdsError::NoSuchKey);
    }
    rows.iter().map(|(_, v)| decode(v)).collect()
}

pub fn write_tree_node_by_range<W: KeyWriter + ?Sized>(
    kw: &mut W,
    kind: LogKind,
    node: &TreeNode,
) -> Result<()> {
    let key = to_double_int_binary(node.range_start, node.range_end);
    write_record(kw, &bucket(kind, TREE_NODE_BY_RANGE), &key, node)
}

pub fn lookup_tree_node_by_range<R: KeyReader + ?Sized>(
    kr: &R,
    kind: LogKind,
    start: i64,
    end: i64,
) -> Result<Option<TreeNode>> {
    read_record(kr, &bucket(kind, TREE_NODE_BY_RANGE), &to_double_int_binary(start, end))
}

pub fn write_root_hash_by_size<W: KeyWriter + ?Sized>(
    kw: &mut W,
    kind: LogKind,
    head: &LogTreeHead,
) -> Result<()> {
    write_record(kw, &bucket(kind, ROOT_HASH_BY_SIZE), &to_int_binary(head.tree_size), head)
}

pub fn lookup_root_hash_by_size<R: KeyReader + ?Sized>(
    kr: &R,
    kind: LogKind,
    size: i64,
) -> Result<LogTreeHead> {
    if size == 0 {
        return Ok(LogTreeHead { tree_size: 0, root_hash: crypto::empty_tree_hash() });
    }
    read_record(kr, &bucket(kind, ROOT_HASH_BY_SIZE), &to_int_binary(size))?
        .ok_or(VdsError::NoSuchKey)
}

pub fn write_index_by_leaf_hash<W: KeyWriter + ?Sized>(
    kw: &mut W,
    kind: LogKind,
    leaf_hash: &Hash32,
    index: EntryIndex,
) -> Result<()> {
    write_record(kw, &bucket(kind, INDEX_BY_LEAF_HASH), leaf_hash, &index)
}

pub fn lookup_index_by_leaf_hash<R: KeyReader + ?Sized>(
    kr: &R,
    kind: LogKind,
    leaf_hash: &Hash32,
) -> Result<Option<EntryIndex>> {
    read_record(kr, &bucket(kind, INDEX_BY_LEAF_HASH), leaf_hash)
}

pub fn write_tree_head<W: KeyWriter + ?Sized>(
    kw: &mut W,
    kind: LogKind,
    head: &LogTreeHead,
) -> Result<()> {
    write_record(kw, &bucket(kind, HEAD), CURRENT_HEAD_KEY, head)
}

/// Current head, or the empty head if nothing was ever appended.
pub fn lookup_tree_head<R: KeyReader + ?Sized>(kr: &R, kind: LogKind) -> Result<LogTreeHead> {
    Ok(read_record(kr, &bucket(kind, HEAD), CURRENT_HEAD_KEY)?
        .unwrap_or(LogTreeHead { tree_size: 0, root_hash: crypto::empty_tree_hash() }))
}

// --- map records ---

fn map_node_key(version: i64, path: &BitPath) -> Vec<u8> {
    let mut key = to_int_binary(version).to_vec();
    key.extend_from_slice(path.as_bytes());
    key
}

pub fn write_map_node<W: KeyWriter + ?Sized>(
    kw: &mut W,
    version: i64,
    path: &BitPath,
    node: &MapNode,
) -> Result<()> {
    write_record(kw, MAP_NODE_BUCKET, &map_node_key(version, path), node)
}

/// Node written at `version` for prefix `path`. The root of version 0 is the
/// empty map and is never stored.
pub fn lookup_map_node<R: KeyReader + ?Sized>(
    kr: &R,
    version: i64,
    path: &BitPath,
) -> Result<MapNode> {
    if version == 0 && path.is_empty() {
        return Ok(MapNode::empty());
    }
    read_record(kr, MAP_NODE_BUCKET, &map_node_key(version, path))?.ok_or(VdsError::NoSuchKey)
}

pub fn write_map_value<W: KeyWriter + ?Sized>(
    kw: &mut W,
    leaf_hash: &Hash32,
    value: &[u8],
) -> Result<()> {
    kw.set(MAP_DATA_BUCKET, leaf_hash, Some(value))
}

pub fn lookup_map_value<R: KeyReader + ?Sized>(kr: &R, leaf_hash: &Hash32) -> Result<Vec<u8>> {
    kr.get(MAP_DATA_BUCKET, leaf_hash)?.ok_or(VdsError::NoSuchKey)
}

// --- account registry ---

pub fn registry_contains<R: KeyReader + ?Sized>(kr: &R, bucket: &[u8], name: &str) -> Result<bool> {
    Ok(kr.get(bucket, name.as_bytes())?.is_some())
}

pub fn registry_set<W: KeyWriter + ?Sized>(
    kw: &mut W,
    bucket: &[u8],
    name: &str,
    present: bool,
) -> Result<()> {
    kw.set(bucket, name.as_bytes(), present.then_some(&[][..]))
}

/// Names in a registry bucket, in byte order.
pub fn registry_list<R: KeyReader + ?Sized>(kr: &R, bucket: &[u8]) -> Result<Vec<String>> {
    // 0xff never starts a UTF-8 sequence, so it bounds every name.
    kr.range(bucket, &[], &[0xff])?
        .into_iter()
        .map(|(k, _)| String::from_utf8(k).map_err(|e| VdsError::Serialization(e.to_string())))
        .collect()
}
