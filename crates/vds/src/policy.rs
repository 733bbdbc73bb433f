//! Access control seam
//!
//! The service asks an [`AccessPolicy`] before every operation. Which
//! permission a log operation needs depends on the kind of log it targets:
//! reading a map's mutation log is more sensitive than reading its hashes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::LogKind;
use crate::{Result, VdsError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Wildcard, grants everything.
    All,
    LogCreate,
    LogDelete,
    LogList,
    LogRawAdd,
    LogReadEntry,
    LogReadHash,
    LogProveInclusion,
    MapCreate,
    MapDelete,
    MapList,
    MapSetValue,
    MapGetValue,
    MapMutationReadEntry,
    MapMutationReadHash,
}

/// Operations that exist on every log kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOperation {
    RawAdd,
    ReadEntry,
    ReadHash,
    ProveInclusion,
}

/// Permission needed for `op` on a log of `kind`, `None` if the operation is
/// never allowed there.
pub fn permission_for(kind: LogKind, op: LogOperation) -> Option<Permission> {
    use LogOperation::*;
    match (kind, op) {
        (LogKind::User, RawAdd) => Some(Permission::LogRawAdd),
        (LogKind::User, ReadEntry) => Some(Permission::LogReadEntry),
        (LogKind::User, ReadHash) => Some(Permission::LogReadHash),
        (LogKind::User, ProveInclusion) => Some(Permission::LogProveInclusion),
        (LogKind::Mutation, ReadEntry) => Some(Permission::MapMutationReadEntry),
        (LogKind::Mutation, ReadHash | ProveInclusion) => Some(Permission::MapMutationReadHash),
        (LogKind::TreeHead, ReadEntry | ReadHash | ProveInclusion) => {
            Some(Permission::MapMutationReadHash)
        }
        (_, RawAdd) => None,
    }
}

pub trait AccessPolicy: Send + Sync {
    /// `Err(VdsError::Unauthorized)` unless `permission` is granted on object
    /// `name` of `account`.
    fn verify_access(&self, account: &str, name: &str, permission: Permission) -> Result<()>;
}

/// Grants everything (tests and single-tenant embedding).
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAllPolicy;

impl AccessPolicy for AllowAllPolicy {
    fn verify_access(&self, _account: &str, _name: &str, _permission: Permission) -> Result<()> {
        Ok(())
    }
}

/// One line of a static policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyGrant {
    pub account: String,
    /// Object name pattern, `*` matches any run of characters.
    pub name_match: String,
    pub permissions: Vec<Permission>,
}

/// Explicit grants, everything else denied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticPolicy {
    pub grants: Vec<PolicyGrant>,
}

impl StaticPolicy {
    pub fn new(grants: Vec<PolicyGrant>) -> Self {
        Self { grants }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VdsError::Serialization(e.to_string()))
    }

    pub fn grant(mut self, account: &str, name_match: &str, permissions: &[Permission]) -> Self {
        self.grants.push(PolicyGrant {
            account: account.to_string(),
            name_match: name_match.to_string(),
            permissions: permissions.to_vec(),
        });
        self
    }
}

impl AccessPolicy for StaticPolicy {
    fn verify_access(&self, account: &str, name: &str, permission: Permission) -> Result<()> {
        let allowed = self.grants.iter().any(|g| {
            g.account == account
                && g.permissions.iter().any(|p| *p == Permission::All || *p == permission)
                && wildcard_match(&g.name_match, name)
        });
        if allowed {
            Ok(())
        } else {
            debug!(account, name, ?permission, "access denied");
            Err(VdsError::Unauthorized)
        }
    }
}

fn wildcard_match(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, rest)) => {
            let Some(tail) = name.strip_prefix(prefix) else {
                return false;
            };
            (0..=tail.len())
                .filter(|&i| tail.is_char_boundary(i))
                .any(|i| wildcard_match(rest, &tail[i..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("pub-*", "pub-log"));
        assert!(!wildcard_match("pub-*", "priv-log"));
        assert!(wildcard_match("a*c*e", "abcde"));
        assert!(!wildcard_match("a*c*e", "abcd"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("exact", "exact2"));
    }

    #[test]
    fn test_permission_table() {
        assert_eq!(
            permission_for(LogKind::User, LogOperation::RawAdd),
            Some(Permission::LogRawAdd)
        );
        assert_eq!(permission_for(LogKind::Mutation, LogOperation::RawAdd), None);
        assert_eq!(permission_for(LogKind::TreeHead, LogOperation::RawAdd), None);
        assert_eq!(
            permission_for(LogKind::Mutation, LogOperation::ReadEntry),
            Some(Permission::MapMutationReadEntry)
        );
        assert_eq!(
            permission_for(LogKind::TreeHead, LogOperation::ReadEntry),
            Some(Permission::MapMutationReadHash)
        );
    }

    #[test]
    fn test_static_policy() {
        let policy = StaticPolicy::default()
            .grant("acme", "public-*", &[Permission::LogReadHash])
            .grant("acme", "admin", &[Permission::All]);

        assert!(policy.verify_access("acme", "public-feed", Permission::LogReadHash).is_ok());
        assert_eq!(
            policy.verify_access("acme", "public-feed", Permission::LogRawAdd),
            Err(VdsError::Unauthorized)
        );
        assert!(policy.verify_access("acme", "admin", Permission::MapDelete).is_ok());
        assert_eq!(
            policy.verify_access("other", "admin", Permission::MapDelete),
            Err(VdsError::Unauthorized)
        );
    }

    #[test]
    fn test_static_policy_from_json() {
        let policy = StaticPolicy::from_json(
            r#"{"grants":[{"account":"a","name_match":"*",
                "permissions":["log_raw_add","map_get_value"]}]}"#,
        )
        .unwrap();
        assert!(policy.verify_access("a", "x", Permission::MapGetValue).is_ok());
        assert!(policy.verify_access("a", "x", Permission::MapSetValue).is_err());
    }
}
