//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Env var naming an optional settings file.
pub const SETTINGS_PATH_ENV: &str = "RELAY_SETTINGS";

/// Load settings from `path`, falling back to `$RELAY_SETTINGS`, then to
/// defaults alone. Env overrides are applied last.
pub fn load_settings(path: Option<&Path>) -> Result<RelaySettings> {
    let from_env = read_env_string(SETTINGS_PATH_ENV).map(PathBuf::from);
    match path.map(Path::to_path_buf).or(from_env) {
        Some(path) => load_settings_from_path(&path),
        None => {
            let mut settings = RelaySettings::default();
            apply_env_overrides(&mut settings);
            settings.validate()?;
            Ok(settings)
        }
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_overrides_from<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("RELAY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("RELAY_EVENT_BUFFER", 1, 65_536) {
        settings.server.event_buffer = v;
    }
    if let Some(v) = env.u64("RELAY_SHUTDOWN_TIMEOUT", 0, 3600) {
        settings.server.shutdown_timeout_secs = v;
    }

    // ── Redis ───────────────────────────────────────────────────────
    if let Some(v) = env.string("CACHE_REDIS_HOST") {
        settings.redis.host = v;
    }
    if let Some(v) = env.u16("CACHE_REDIS_PORT", 1, 65535) {
        settings.redis.port = v;
    }
    if let Some(v) = env.u64("CACHE_REDIS_DB", 0, 10_000).and_then(|v| i64::try_from(v).ok()) {
        settings.redis.db = v;
    }
    // An explicitly empty password disables AUTH, so this one is read raw.
    if let Some(v) = (env.lookup)("CACHE_REDIS_PASSWORD") {
        settings.redis.password = v;
    }

    // ── Stream ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("RELAY_POLL_TIMEOUT_MS", 10, 60_000) {
        settings.stream.poll_timeout_ms = v;
    }
    if let Some(v) = env.u64("RELAY_PING_INTERVAL_SECS", 1, 3600) {
        settings.stream.ping_interval_secs = v;
    }

    // ── Health ──────────────────────────────────────────────────────
    if let Some(v) = env.u64("RELAY_HEALTH_TIMEOUT_MS", 10, 60_000) {
        settings.health.ping_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
