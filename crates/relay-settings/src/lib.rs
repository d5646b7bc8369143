//! # relay-settings
//!
//! Layered configuration for the stream relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: an optional JSON file, deep-merged over defaults
//! 3. **Environment variables**: `RELAY_*` and `CACHE_REDIS_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 5100);
        assert_eq!(settings.redis.host, "localhost");
        assert_eq!(settings.redis.port, 6379);
        assert_eq!(settings.redis.db, 0);
        assert_eq!(settings.stream.poll_timeout_ms, 1000);
        assert_eq!(settings.stream.ping_interval_secs, 30);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn deep_merge_re_exported() {
        let a = serde_json::json!({"x": 1});
        let b = serde_json::json!({"y": 2});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
