//! Storage boundary and an in-memory implementation
//!
//! The tree algorithms only ever see a [`KeyReader`] or [`KeyWriter`] scoped
//! to one namespace and one transaction. Transaction lifetime belongs to the
//! [`Storage`] implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::{Result, VdsError};

/// Read access to one namespace inside a transaction.
pub trait KeyReader {
    /// `Ok(None)` when the key is absent.
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All pairs with `first <= key <= last`, ordered by key.
    fn range(&self, bucket: &[u8], first: &[u8], last: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Write access to one namespace inside a transaction.
pub trait KeyWriter: KeyReader {
    /// `None` deletes the key.
    fn set(&mut self, bucket: &[u8], key: &[u8], value: Option<&[u8]>) -> Result<()>;
}

pub trait Storage: Send + Sync {
    /// Run `f` against a consistent snapshot of `namespace`.
    fn execute_read_only<T, F>(&self, namespace: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&dyn KeyReader) -> Result<T>;

    /// Run `f` as a single update of `namespace`. Writes become visible only
    /// if `f` succeeds, and at most one update runs at a time.
    fn execute_update<T, F>(&self, namespace: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn KeyWriter) -> Result<T>;

    /// Drop everything in `namespace`, leaving an empty one behind if `recreate`.
    fn reset_namespace(&self, namespace: &[u8], recreate: bool) -> Result<()>;
}

/// bucket -> key -> value
type Namespace = HashMap<Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>>;

/// In-memory storage (for testing and demos)
///
/// One lock guards every namespace, so updates are fully serialized and
/// readers never observe a half-applied update.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<HashMap<String, Namespace>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live namespaces.
    pub fn namespace_count(&self) -> Result<usize> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data.len())
    }
}

fn poisoned() -> VdsError {
    VdsError::Storage("storage lock poisoned".into())
}

fn namespace_key(namespace: &[u8]) -> String {
    hex::encode(namespace)
}

fn range_of<'a>(
    bucket: Option<&'a BTreeMap<Vec<u8>, Vec<u8>>>,
    first: &[u8],
    last: &[u8],
) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> {
    let bucket = bucket.filter(|_| first <= last);
    let (first, last) = (first.to_vec(), last.to_vec());
    bucket
        .into_iter()
        .flat_map(move |b| b.range(first.clone()..=last.clone()))
}

impl Storage for InMemoryStorage {
    fn execute_read_only<T, F>(&self, namespace: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&dyn KeyReader) -> Result<T>,
    {
        let data = self.data.read().map_err(|_| poisoned())?;
        let reader = MemReader { data: data.get(&namespace_key(namespace)) };
        f(&reader)
    }

    fn execute_update<T, F>(&self, namespace: &[u8], f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn KeyWriter) -> Result<T>,
    {
        let key = namespace_key(namespace);
        let mut data = self.data.write().map_err(|_| poisoned())?;

        let (rv, pending) = {
            let mut writer = MemWriter { base: data.get(&key), pending: BTreeMap::new() };
            let rv = f(&mut writer)?;
            (rv, writer.pending)
        };

        let ns = data.entry(key).or_default();
        for ((bucket, k), v) in pending {
            match v {
                Some(v) => {
                    ns.entry(bucket).or_default().insert(k, v);
                }
                None => {
                    if let Some(b) = ns.get_mut(&bucket) {
                        b.remove(&k);
                    }
                }
            }
        }
        Ok(rv)
    }

    fn reset_namespace(&self, namespace: &[u8], recreate: bool) -> Result<()> {
        let key = namespace_key(namespace);
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.remove(&key);
        if recreate {
            data.insert(key, Namespace::new());
        }
        Ok(())
    }
}

struct MemReader<'a> {
    data: Option<&'a Namespace>,
}

impl KeyReader for MemReader<'_> {
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.and_then(|ns| ns.get(bucket)).and_then(|b| b.get(key)).cloned())
    }

    fn range(&self, bucket: &[u8], first: &[u8], last: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let b = self.data.and_then(|ns| ns.get(bucket));
        Ok(range_of(b, first, last).map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// Buffers writes over the committed namespace until the update succeeds.
struct MemWriter<'a> {
    base: Option<&'a Namespace>,
    pending: BTreeMap<(Vec<u8>, Vec<u8>), Option<Vec<u8>>>,
}

impl KeyReader for MemWriter<'_> {
    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(v) = self.pending.get(&(bucket.to_vec(), key.to_vec())) {
            return Ok(v.clone());
        }
        Ok(self.base.and_then(|ns| ns.get(bucket)).and_then(|b| b.get(key)).cloned())
    }

    fn range(&self, bucket: &[u8], first: &[u8], last: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let b = self.base.and_then(|ns| ns.get(bucket));
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            range_of(b, first, last).map(|(k, v)| (k.clone(), v.clone())).collect();

        if first > last {
            return Ok(Vec::new());
        }
        let lo = (bucket.to_vec(), first.to_vec());
        let hi = (bucket.to_vec(), last.to_vec());
        for ((_, k), v) in self.pending.range(lo..=hi) {
            match v {
                Some(v) => {
                    merged.insert(k.clone(), v.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }
}

impl KeyWriter for MemWriter<'_> {
    fn set(&mut self, bucket: &[u8], key: &[u8], value: Option<&[u8]>) -> Result<()> {
        self.pending.insert((bucket.to_vec(), key.to_vec()), value.map(|v| v.to_vec()));
        Ok(())
    }
}
