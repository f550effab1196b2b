//! # vectorhub-settings
//!
//! Configuration with layered sources for the vectorhub service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VectorHubSettings::default()`]
//! 2. **User file**: `~/.vectorhub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VECTORHUB_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, vectorhub_dir};
pub use types::*;

use std::sync::OnceLock;

/// Process-wide settings, loaded on first access.
static SETTINGS: OnceLock<VectorHubSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.vectorhub/settings.json` with env
/// var overrides. If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static VectorHubSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: VectorHubSettings) -> std::result::Result<(), VectorHubSettings> {
    SETTINGS.set(settings)
}
