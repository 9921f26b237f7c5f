//! Server and hub configuration.

use std::time::Duration;

use livetail_settings::LivetailSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the livetail server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Path prefix of the REST and websocket routes.
    pub api_prefix: String,
    /// Max inbound websocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of the update feed between REST writes and the pipeline.
    pub feed_capacity: usize,
    /// Client identity resolution.
    pub identity: IdentityConfig,
    /// Broadcast hub tuning.
    pub hub: HubConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            api_prefix: "/api".into(),
            max_message_size: 1024 * 1024,
            feed_capacity: 1024,
            identity: IdentityConfig::default(),
            hub: HubConfig::default(),
        }
    }
}

impl From<&LivetailSettings> for ServerConfig {
    fn from(settings: &LivetailSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            api_prefix: settings.server.api_prefix.trim_end_matches('/').to_owned(),
            max_message_size: settings.server.max_message_size,
            feed_capacity: settings.hub.channel_capacity,
            identity: IdentityConfig {
                cookie_name: settings.identity.cookie_name.clone(),
                cookie_secret: settings.identity.cookie_secret.clone(),
                header_name: settings.identity.header_name.clone(),
            },
            hub: HubConfig::from(settings),
        }
    }
}

/// How a request is mapped to a client id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Name of the signed cookie carrying the client id.
    pub cookie_name: String,
    /// Secret the cookie signing key is derived from.
    pub cookie_secret: String,
    /// Header that takes precedence over the cookie.
    pub header_name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cookie_name: "livetail_client".into(),
            cookie_secret: "change-me-livetail-cookie-secret".into(),
            header_name: "x-user-id".into(),
        }
    }
}

/// Broadcast hub tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Per-session outbound queue capacity. A full queue evicts the session.
    pub outbound_queue_capacity: usize,
    /// Capacity of the bounded add and broadcast inboxes.
    pub channel_capacity: usize,
    /// Retries of an unpaired filter before it is dropped.
    pub pairing_max_attempts: u32,
    /// Delay before an unpaired filter is resubmitted.
    #[serde(with = "duration_millis")]
    pub pairing_retry_delay: Duration,
    /// Buffered monitoring events per subscriber.
    pub monitor_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: 64,
            channel_capacity: 1024,
            pairing_max_attempts: 3,
            pairing_retry_delay: Duration::from_secs(2),
            monitor_capacity: 256,
        }
    }
}

impl From<&LivetailSettings> for HubConfig {
    fn from(settings: &LivetailSettings) -> Self {
        Self {
            outbound_queue_capacity: settings.hub.outbound_queue_capacity,
            channel_capacity: settings.hub.channel_capacity,
            pairing_max_attempts: settings.hub.pairing_max_attempts,
            pairing_retry_delay: Duration::from_millis(settings.hub.pairing_retry_delay_ms),
            monitor_capacity: settings.hub.monitor_capacity.max(1),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
