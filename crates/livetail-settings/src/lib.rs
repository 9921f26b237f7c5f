//! # livetail-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LivetailSettings::default()`]
//! 2. **Settings file**: `~/.livetail/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `LIVETAIL_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
