//! Settings loading: compiled defaults, then the JSON file, then `LIVETAIL_*`
//! environment overrides, then validation.
//!
//! The file is merged over the defaults as JSON before deserializing, so a
//! file only needs the keys it changes. Nested objects merge per key; arrays
//! and scalars replace; `null` leaves the default in place.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::LivetailSettings;

/// `~/.livetail/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".livetail")
        .join("settings.json")
}

/// Load from [`settings_path`].
pub fn load_settings() -> Result<LivetailSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, overlaying the process environment.
///
/// A missing file yields defaults; unreadable JSON and values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<LivetailSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<LivetailSettings> {
    let mut layered = serde_json::to_value(LivetailSettings::default())?;
    if path.is_file() {
        debug!(path = %path.display(), "merging settings file");
        let file: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        layered = deep_merge(layered, file);
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
    }
    Ok(serde_json::from_value(layered)?)
}

/// Merge `overlay` into `base`, recursing into objects present on both sides.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Overlay `LIVETAIL_*` variables from the process environment.
pub fn apply_env_overrides(settings: &mut LivetailSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Overlay variables resolved through `lookup`. Empty values are treated as
/// unset; values that do not parse or are out of range are ignored with a
/// warning.
pub fn apply_overrides<F>(settings: &mut LivetailSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("LIVETAIL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("LIVETAIL_PORT", 1u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("LIVETAIL_API_PREFIX") {
        settings.server.api_prefix = v;
    }

    if let Some(v) = env.ranged("LIVETAIL_QUEUE_CAPACITY", 1usize, 1_000_000) {
        settings.hub.outbound_queue_capacity = v;
    }
    if let Some(v) = env.ranged("LIVETAIL_PAIRING_ATTEMPTS", 0u32, 100) {
        settings.hub.pairing_max_attempts = v;
    }
    if let Some(v) = env.ranged("LIVETAIL_PAIRING_DELAY_MS", 1u64, 600_000) {
        settings.hub.pairing_retry_delay_ms = v;
    }

    if let Some(v) = env.string("LIVETAIL_COOKIE_SECRET") {
        settings.identity.cookie_secret = v;
    }

    if let Some(v) = env.string("LIVETAIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.flag("LIVETAIL_LOG_JSON") {
        settings.logging.json = v;
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn flag(&self, name: &str) -> Option<bool> {
        let raw = self.string(name)?;
        let parsed = parse_bool(&raw);
        if parsed.is_none() {
            warn!(var = name, value = %raw, "ignoring non-boolean override");
        }
        parsed
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let raw = self.string(name)?;
        let parsed = parse_in_range(&raw, min, max);
        if parsed.is_none() {
            warn!(var = name, value = %raw, "ignoring out-of-range override");
        }
        parsed
    }
}

/// `true`/`1`/`yes`/`on` and their negatives, case-insensitively.
pub fn parse_bool(val: &str) -> Option<bool> {
    let val = val.trim();
    if ["true", "1", "yes", "on"].iter().any(|t| val.eq_ignore_ascii_case(t)) {
        Some(true)
    } else if ["false", "0", "no", "off"].iter().any(|f| val.eq_ignore_ascii_case(f)) {
        Some(false)
    } else {
        None
    }
}

/// Parse `val` and accept it only within `min..=max`.
pub fn parse_in_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    val.trim()
        .parse()
        .ok()
        .filter(|n| (min..=max).contains(n))
}
