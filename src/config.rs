//! Engine configuration.
//!
//! Plain data supplied by the integrator (the hosting app owns where it
//! comes from — env, settings screen, provisioning payload). Serde-enabled
//! so it can be deserialized straight out of a settings store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Base URL of the remote check-in authority.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: String,
    /// Identifier of this terminal, for server-side auditing.
    pub terminal_id: String,
    /// Directory for the local database.
    pub data_dir: PathBuf,
    /// Background drain interval while online.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Per-request timeout for remote check-in calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl EngineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserializes_with_defaulted_intervals() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "baseUrl": "https://events.example.com",
                "apiKey": "key-1",
                "terminalId": "door-3",
                "dataDir": "/tmp/checkin"
            }"#,
        )
        .unwrap();

        assert_eq!(config.sync_interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_explicit_intervals_win() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "baseUrl": "https://events.example.com",
                "apiKey": "key-1",
                "terminalId": "door-3",
                "dataDir": "/tmp/checkin",
                "syncIntervalSecs": 5,
                "requestTimeoutSecs": 3
            }"#,
        )
        .unwrap();
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
    }
}
