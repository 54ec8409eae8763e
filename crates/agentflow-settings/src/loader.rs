//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::AgentflowSettings;

/// `~/.agentflow`, falling back to `/tmp/.agentflow` without `HOME`.
pub fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".agentflow")
}

/// `~/.agentflow/settings.json`.
pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AgentflowSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<AgentflowSettings> {
    let defaults = serde_json::to_value(AgentflowSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AgentflowSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Merge `source` over `target` following the rules in the module docs.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `AGENTFLOW_*` overrides. `lookup` is `std::env::var` in production;
/// invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut AgentflowSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("AGENTFLOW_API_URL") {
        settings.api.base_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = read("AGENTFLOW_API_TOKEN") {
        settings.api.token = Some(v);
    }
    if let Some(v) = read("AGENTFLOW_STREAM_IDLE_TIMEOUT_MS") {
        match parse_u64_range(&v, 1_000, 3_600_000) {
            Some(ms) => settings.api.stream_idle_timeout_ms = ms,
            None => warn_invalid("AGENTFLOW_STREAM_IDLE_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("AGENTFLOW_AUTOSAVE_SECS") {
        match parse_u64_range(&v, 1, 86_400) {
            Some(secs) => settings.autosave.interval_secs = secs,
            None => warn_invalid("AGENTFLOW_AUTOSAVE_SECS", &v),
        }
    }
    if let Some(v) = read("AGENTFLOW_AUTOSAVE_ENABLED") {
        match parse_bool(&v) {
            Some(enabled) => settings.autosave.enabled = enabled,
            None => warn_invalid("AGENTFLOW_AUTOSAVE_ENABLED", &v),
        }
    }
    if let Some(v) = read("AGENTFLOW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("AGENTFLOW_STATE_DB") {
        settings.session.store_path = v;
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an integer, rejecting values outside `min..=max`.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}
