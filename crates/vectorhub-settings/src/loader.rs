//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VectorHubSettings::default()`]
//! 2. If `~/.vectorhub/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::VectorHubSettings;

/// Resolve the vectorhub home directory (`~/.vectorhub`).
pub fn vectorhub_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vectorhub")
}

/// Resolve the path to the settings file (`~/.vectorhub/settings.json`).
pub fn settings_path() -> PathBuf {
    vectorhub_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VectorHubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or a
/// combination that fails [`VectorHubSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VectorHubSettings> {
    let defaults = serde_json::to_value(VectorHubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VectorHubSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut VectorHubSettings) {
    // ── Service ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VECTORHUB_DEFAULT_MODEL") {
        settings.service.default_model = v;
    }
    if let Some(v) = read_env_usize("VECTORHUB_MAX_BATCH_SIZE", 1, 10_000) {
        settings.service.max_batch_size = v;
    }

    // ── Text ────────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("VECTORHUB_MAX_TOKENS", 1, 1_000_000) {
        settings.text.default_max_tokens = v;
    }

    // ── Search ──────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("VECTORHUB_SEARCH_TOP_K", 1, 10_000) {
        settings.search.top_k = v;
    }
    if let Some(v) = read_env_f32("VECTORHUB_SEARCH_THRESHOLD", -1.0, 1.0) {
        settings.search.threshold = v;
    }

    // ── Recorder ────────────────────────────────────────────────────
    if let Some(v) = read_env_bool("VECTORHUB_RECORDER_ENABLED") {
        settings.recorder.enabled = v;
    }
    if let Some(v) = read_env_u64("VECTORHUB_RECORDER_FLUSH_MS", 10, 600_000) {
        settings.recorder.flush_interval_ms = v;
    }

    // ── Metrics ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("VECTORHUB_RETENTION_DAYS", 0, 36_500) {
        settings.metrics.retention_days = v as u32;
    }

    // ── Database / logging ──────────────────────────────────────────
    if let Some(v) = read_env_string("VECTORHUB_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = read_env_string("VECTORHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("VECTORHUB_LOG_JSON") {
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

/// Parse a string as a finite `f32` within a range.
pub fn parse_f32_range(val: &str, min: f32, max: f32) -> Option<f32> {
    let n: f32 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f32(name: &str, min: f32, max: f32) -> Option<f32> {
    let val = std::env::var(name).ok()?;
    let result = parse_f32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f32 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
