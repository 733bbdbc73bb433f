use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub account: String,
    pub log_name: String,
    pub map_name: String,
    pub entries: i64,
    pub max_fetch: Option<i64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let account = var_or("VDS_ACCOUNT", "demo");
        let log_name = var_or("VDS_LOG_NAME", "events");
        let map_name = var_or("VDS_MAP_NAME", "registry");

        let entries = parse_i64("VDS_ENTRIES")?.unwrap_or(17);
        let max_fetch = parse_i64("VDS_MAX_FETCH")?;

        if entries < 1 {
            bail!("VDS_ENTRIES must be at least 1");
        }
        if matches!(max_fetch, Some(m) if m < 1) {
            bail!("VDS_MAX_FETCH must be at least 1");
        }

        Ok(Self { account, log_name, map_name, entries, max_fetch })
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_i64(key: &str) -> Result<Option<i64>> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map(Some)
            .with_context(|| format!("{key} must be an integer, got {v:?}")),
        Err(_) => Ok(None),
    }
}
