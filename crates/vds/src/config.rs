use serde::Deserialize;

use crate::{Result, VdsError};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Cap on entries returned by a single fetch.
    pub max_fetch_entries: i64,
    /// Generate an ed25519 key at startup and sign tree heads with it.
    pub sign_tree_heads: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { max_fetch_entries: 1000, sign_tree_heads: false }
    }
}

impl ServiceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|e| VdsError::Serialization(e.to_string()))?;
        if cfg.max_fetch_entries < 1 {
            return Err(VdsError::InvalidRequest("max_fetch_entries must be at least 1".into()));
        }
        Ok(cfg)
    }
}
