//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ChannelSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ChannelSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ChannelSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an unusable URL is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ChannelSettings> {
    let defaults = serde_json::to_value(ChannelSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ChannelSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` environment variable overrides.
///
/// Integers must parse and fall within range; invalid values are ignored
/// with a warning and the file/default value is kept.
pub fn apply_env_overrides(settings: &mut ChannelSettings) {
    if let Some(v) = read_env_string("TETHER_URL") {
        settings.url = v;
    }
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = read_env_u64("TETHER_RECONNECT_ATTEMPTS", 0, 100) {
        settings.reconnect.max_attempts = v as u32;
    }
    if let Some(v) = read_env_u64("TETHER_RECONNECT_DELAY_MS", 10, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_HANDLER_TIMEOUT_MS", 100, 3_600_000) {
        settings.handler_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_CALL_TIMEOUT_MS", 100, 3_600_000) {
        settings.default_call_timeout_ms = v;
    }
}

fn validate(settings: &ChannelSettings) -> Result<()> {
    if !(settings.url.starts_with("ws://") || settings.url.starts_with("wss://")) {
        return Err(SettingsError::InvalidValue(format!(
            "url must be a ws:// or wss:// endpoint, got '{}'",
            settings.url
        )));
    }
    if settings.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "outboundQueue must be at least 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
