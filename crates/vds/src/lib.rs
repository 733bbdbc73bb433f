//! Verifiable Data Structures
//!
//! Append-only Merkle logs and versioned sparse Merkle maps over a pluggable
//! key/value store, with inclusion, consistency and map value proofs.

mod bpath;
mod config;
mod crypto;
mod log;
mod merkle;
mod mutation;
mod nodestore;
mod policy;
mod smt;
mod storage;
mod types;
pub mod verify;

pub use bpath::BitPath;
pub use config::ServiceConfig;
pub use crypto::{
    default_leaf_value, empty_tree_hash, leaf_hash, node_hash, null_leaf_hash, MAP_DEPTH,
};
pub use log::LogTree;
pub use mutation::{MapMutation, MutationAction};
pub use policy::{
    permission_for, AccessPolicy, AllowAllPolicy, LogOperation, Permission, PolicyGrant,
    StaticPolicy,
};
pub use storage::{InMemoryStorage, KeyReader, KeyWriter, Storage};
pub use types::{
    AddEntryOutcome, AddEntryResponse, ConsistencyProof, Hash32, InclusionProof, LeafRef, LogKind,
    LogRef, LogTreeHead, MapRef, MapSetResponse, MapTreeHead, MapValueProof, SignedTreeHead,
};

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand_core::OsRng;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VdsError {
    #[error("Invalid range")]
    InvalidRange,

    #[error("Not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Verification failed")]
    VerificationFailed,

    #[error("Not implemented")]
    Unimplemented,

    #[error("No such key")]
    NoSuchKey,

    #[error("Already exists")]
    AlreadyExists,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, VdsError>;

/// Storage-level absence means the caller asked for something that is not there.
fn surface<T>(rv: Result<T>) -> Result<T> {
    rv.map_err(|e| match e {
        VdsError::NoSuchKey => VdsError::NotFound,
        other => other,
    })
}

fn log_namespace(log: &LogRef) -> Result<Hash32> {
    match log.kind {
        LogKind::User => crypto::namespace_digest(&("log", &log.account, &log.name)),
        // Mutation and tree-head logs live with their map.
        LogKind::Mutation | LogKind::TreeHead => {
            crypto::namespace_digest(&("map", &log.account, &log.name))
        }
    }
}

fn map_namespace(map: &MapRef) -> Result<Hash32> {
    crypto::namespace_digest(&("map", &map.account, &map.name))
}

fn account_namespace(account: &str) -> Result<Hash32> {
    crypto::namespace_digest(&("account", account, ""))
}

/// Logs and maps for many accounts, behind one storage backend and policy.
///
/// Writes to one namespace are serialized by the storage backend, which is
/// what keeps log appends and map versions gap-free.
pub struct VerifiableService<S: Storage, P: AccessPolicy = AllowAllPolicy> {
    storage: S,
    policy: P,
    config: ServiceConfig,
    signing_key: Option<SigningKey>,
}

impl<S: Storage> VerifiableService<S, AllowAllPolicy> {
    /// Service with default configuration and no access control.
    pub fn new(storage: S) -> Self {
        Self::with_policy(storage, AllowAllPolicy, ServiceConfig::default())
    }
}

impl<S: Storage, P: AccessPolicy> VerifiableService<S, P> {
    pub fn with_policy(storage: S, policy: P, config: ServiceConfig) -> Self {
        let signing_key = config.sign_tree_heads.then(|| SigningKey::generate(&mut OsRng));
        Self { storage, policy, config, signing_key }
    }

    /// Sign tree heads with a fixed key (for testing/recovery)
    pub fn with_signing_key(mut self, signing_key: SigningKey) -> Self {
        self.signing_key = Some(signing_key);
        self
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.signing_key.as_ref().map(|k| k.verifying_key())
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn check_log_operation(&self, log: &LogRef, op: LogOperation) -> Result<()> {
        let permission = permission_for(log.kind, op).ok_or(VdsError::Unauthorized)?;
        self.policy.verify_access(&log.account, &log.name, permission)
    }

    // ---------------- Logs ---------------- //

    /// Append `data` to a user log. Re-adding existing data is not an error.
    pub fn add_entry(&self, log: &LogRef, data: &[u8]) -> Result<AddEntryResponse> {
        if log.kind != LogKind::User {
            return Err(VdsError::InvalidRequest(format!(
                "cannot add entries to a {:?} log",
                log.kind
            )));
        }
        self.check_log_operation(log, LogOperation::RawAdd)?;

        let ns = log_namespace(log)?;
        let outcome = surface(
            self.storage.execute_update(&ns, |kw| LogTree::new(log.kind).add_entry(kw, data)),
        )?;
        Ok(AddEntryResponse { leaf_hash: crypto::leaf_hash(data), duplicate: outcome.duplicate })
    }

    /// Head at `tree_size`, 0 meaning the current head.
    pub fn tree_hash(&self, log: &LogRef, tree_size: i64) -> Result<LogTreeHead> {
        self.check_log_operation(log, LogOperation::ReadHash)?;
        let ns = log_namespace(log)?;
        surface(self.storage.execute_read_only(&ns, |kr| {
            LogTree::new(log.kind).tree_hash(kr, tree_size)
        }))
    }

    pub fn inclusion_proof(
        &self,
        log: &LogRef,
        tree_size: i64,
        leaf: LeafRef,
    ) -> Result<InclusionProof> {
        self.check_log_operation(log, LogOperation::ProveInclusion)?;
        let ns = log_namespace(log)?;
        surface(self.storage.execute_read_only(&ns, |kr| {
            LogTree::new(log.kind).inclusion_proof(kr, leaf, tree_size)
        }))
    }

    pub fn consistency_proof(
        &self,
        log: &LogRef,
        first_size: i64,
        second_size: i64,
    ) -> Result<ConsistencyProof> {
        self.check_log_operation(log, LogOperation::ReadHash)?;
        let ns = log_namespace(log)?;
        surface(self.storage.execute_read_only(&ns, |kr| {
            LogTree::new(log.kind).consistency_proof(kr, first_size, second_size)
        }))
    }

    /// Raw entries `[first, last)`, `last = 0` meaning the current size.
    /// Long runs are truncated to `max_fetch_entries`.
    pub fn fetch_entries(&self, log: &LogRef, first: i64, last: i64) -> Result<Vec<Vec<u8>>> {
        self.check_log_operation(log, LogOperation::ReadEntry)?;
        let ns = log_namespace(log)?;
        let max = self.config.max_fetch_entries;
        surface(self.storage.execute_read_only(&ns, |kr| {
            LogTree::new(log.kind).fetch_entries(kr, first, last, max)
        }))
    }

    pub fn signed_tree_hash(&self, log: &LogRef, tree_size: i64) -> Result<SignedTreeHead> {
        let key = self
            .signing_key
            .as_ref()
            .ok_or_else(|| VdsError::InvalidRequest("tree head signing is disabled".into()))?;
        let head = self.tree_hash(log, tree_size)?;
        let signature = key.sign(&verify::tree_head_signing_bytes(&head)?);
        Ok(SignedTreeHead { head, signature: signature.to_bytes().to_vec() })
    }

    // ---------------- Maps ---------------- //

    pub fn map_set_value(&self, map: &MapRef, key: &[u8], value: &[u8]) -> Result<MapSetResponse> {
        self.apply_mutation(map, MapMutation::set(key, value))
    }

    pub fn map_delete_value(&self, map: &MapRef, key: &[u8]) -> Result<MapSetResponse> {
        self.apply_mutation(map, MapMutation::delete(key))
    }

    /// Set `key` only if it currently holds `previous_leaf_hash`. A stale
    /// guard is still sequenced, it just leaves the map unchanged.
    pub fn map_update_value(
        &self,
        map: &MapRef,
        key: &[u8],
        value: &[u8],
        previous_leaf_hash: Hash32,
    ) -> Result<MapSetResponse> {
        self.apply_mutation(map, MapMutation::update(key, value, previous_leaf_hash))
    }

    /// Sequence `mutation` in the map's mutation log, apply it, and record the
    /// resulting map tree head, all in one update.
    pub fn apply_mutation(&self, map: &MapRef, mutation: MapMutation) -> Result<MapSetResponse> {
        self.policy.verify_access(&map.account, &map.name, Permission::MapSetValue)?;

        let entry = mutation.to_json()?;
        let ns = map_namespace(map)?;
        surface(self.storage.execute_update(&ns, |kw| {
            let mutations = LogTree::new(LogKind::Mutation);
            let mutation_index = mutations.head(&*kw)?.tree_size;
            let Some(mutation_log) = mutations.add_entry(kw, &entry)?.new_head else {
                debug!(map = %map.name, "duplicate mutation ignored");
                return Ok(());
            };

            let root_hash = smt::set_map_value(kw, mutation_index, &mutation)?;
            let head = MapTreeHead { root_hash, mutation_log };
            let head_entry = serde_json::to_vec(&head)
                .map_err(|e| VdsError::Serialization(e.to_string()))?;
            LogTree::new(LogKind::TreeHead).add_entry(kw, &head_entry)?;

            info!(
                map = %map.name,
                version = mutation_log.tree_size,
                root = %hex::encode(root_hash),
                "map mutated"
            );
            Ok(())
        }))?;

        Ok(MapSetResponse { leaf_hash: crypto::leaf_hash(&entry) })
    }

    /// Value of `key` with its audit path, at map version `tree_size`
    /// (0 meaning the current version).
    pub fn map_get_value(&self, map: &MapRef, key: &[u8], tree_size: i64) -> Result<MapValueProof> {
        self.policy.verify_access(&map.account, &map.name, Permission::MapGetValue)?;

        let ns = map_namespace(map)?;
        surface(self.storage.execute_read_only(&ns, |kr| {
            let size = LogTree::new(LogKind::Mutation).head(kr)?.tree_size;
            if tree_size < 0 || tree_size > size {
                return Err(VdsError::InvalidRange);
            }
            let version = if tree_size == 0 { size } else { tree_size };

            let lookup = smt::get_value_proof(kr, key, version)?;
            let value = if lookup.leaf_hash == crypto::null_leaf_hash() {
                None
            } else {
                Some(nodestore::lookup_map_value(kr, &lookup.leaf_hash)?)
            };
            Ok(MapValueProof { tree_size: version, audit_path: lookup.audit_path, value })
        }))
    }

    /// Map root at `tree_size` together with the mutation log head it reflects.
    pub fn map_tree_hash(&self, map: &MapRef, tree_size: i64) -> Result<MapTreeHead> {
        self.policy.verify_access(&map.account, &map.name, Permission::MapGetValue)?;

        let ns = map_namespace(map)?;
        surface(self.storage.execute_read_only(&ns, |kr| {
            let mutation_log = LogTree::new(LogKind::Mutation).tree_hash(kr, tree_size)?;
            let root_hash = smt::root_hash(kr, mutation_log.tree_size)?;
            Ok(MapTreeHead { root_hash, mutation_log })
        }))
    }

    // ---------------- Account registry ---------------- //

    pub fn create_log(&self, account: &str, name: &str) -> Result<()> {
        self.policy.verify_access(account, name, Permission::LogCreate)?;
        let ns = log_namespace(&LogRef::user(account, name))?;
        self.register(account, nodestore::LOGS_BUCKET, name, &ns)
    }

    pub fn delete_log(&self, account: &str, name: &str) -> Result<()> {
        self.policy.verify_access(account, name, Permission::LogDelete)?;
        let ns = log_namespace(&LogRef::user(account, name))?;
        self.unregister(account, nodestore::LOGS_BUCKET, name, &ns)
    }

    pub fn list_logs(&self, account: &str) -> Result<Vec<String>> {
        self.policy.verify_access(account, "", Permission::LogList)?;
        let ns = account_namespace(account)?;
        self.storage
            .execute_read_only(&ns, |kr| nodestore::registry_list(kr, nodestore::LOGS_BUCKET))
    }

    pub fn create_map(&self, account: &str, name: &str) -> Result<()> {
        self.policy.verify_access(account, name, Permission::MapCreate)?;
        let ns = map_namespace(&MapRef::new(account, name))?;
        self.register(account, nodestore::MAPS_BUCKET, name, &ns)
    }

    pub fn delete_map(&self, account: &str, name: &str) -> Result<()> {
        self.policy.verify_access(account, name, Permission::MapDelete)?;
        let ns = map_namespace(&MapRef::new(account, name))?;
        self.unregister(account, nodestore::MAPS_BUCKET, name, &ns)
    }

    pub fn list_maps(&self, account: &str) -> Result<Vec<String>> {
        self.policy.verify_access(account, "", Permission::MapList)?;
        let ns = account_namespace(account)?;
        self.storage
            .execute_read_only(&ns, |kr| nodestore::registry_list(kr, nodestore::MAPS_BUCKET))
    }

    fn register(&self, account: &str, bucket: &[u8], name: &str, object_ns: &[u8]) -> Result<()> {
        let ns = account_namespace(account)?;
        self.storage.execute_update(&ns, |kw| {
            if nodestore::registry_contains(&*kw, bucket, name)? {
                return Err(VdsError::AlreadyExists);
            }
            nodestore::registry_set(kw, bucket, name, true)
        })?;
        self.storage.reset_namespace(object_ns, true)?;
        info!(account, name, "created");
        Ok(())
    }

    fn unregister(&self, account: &str, bucket: &[u8], name: &str, object_ns: &[u8]) -> Result<()> {
        let ns = account_namespace(account)?;
        self.storage.execute_update(&ns, |kw| {
            if !nodestore::registry_contains(&*kw, bucket, name)? {
                return Err(VdsError::NotFound);
            }
            nodestore::registry_set(kw, bucket, name, false)
        })?;
        self.storage.reset_namespace(object_ns, false)?;
        info!(account, name, "deleted");
        Ok(())
    }
}
