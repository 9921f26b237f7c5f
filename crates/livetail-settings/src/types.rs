//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file may contain any subset of fields.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "hub": { "outboundQueueCapacity": 16 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivetailSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Broadcast hub tuning.
    pub hub: HubSettings,
    /// Client identity resolution.
    pub identity: IdentitySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl LivetailSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.outboundQueueCapacity must be at least 1".into(),
            ));
        }
        if self.hub.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.channelCapacity must be at least 1".into(),
            ));
        }
        if !self.server.api_prefix.is_empty() && !self.server.api_prefix.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.apiPrefix must start with '/': {}",
                self.server.api_prefix
            )));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Path prefix of the REST and websocket routes.
    pub api_prefix: String,
    /// Max inbound websocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_prefix: "/api".to_string(),
            max_message_size: 1024 * 1024,
        }
    }
}

/// Broadcast hub settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Per-session outbound queue capacity; overflow evicts the session.
    pub outbound_queue_capacity: usize,
    /// Capacity of the hub's add/broadcast inboxes.
    pub channel_capacity: usize,
    /// Filter pairing attempts before a request is dropped.
    pub pairing_max_attempts: u32,
    /// Delay between filter pairing attempts in milliseconds.
    pub pairing_retry_delay_ms: u64,
    /// Buffered monitoring events per subscriber.
    pub monitor_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 64,
            channel_capacity: 1024,
            pairing_max_attempts: 3,
            pairing_retry_delay_ms: 2000,
            monitor_capacity: 256,
        }
    }
}

/// Client identity settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Name of the signed cookie carrying the client id.
    pub cookie_name: String,
    /// Secret the cookie signing key is derived from.
    pub cookie_secret: String,
    /// Header that, when present, overrides the cookie.
    pub header_name: String,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            cookie_name: "livetail_client".to_string(),
            cookie_secret: "change-me-livetail-cookie-secret".to_string(),
            header_name: "x-user-id".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
