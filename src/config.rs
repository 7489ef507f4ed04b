//! Runtime configuration for the ground core.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

pub const DEFAULT_SCOPE: &str = "DEFAULT";
const DEFAULT_STALE_TIME_S: u64 = 30;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 100;
const DEFAULT_CMD_TIMEOUT_S: f64 = 5.0;
const DEFAULT_STREAM_MAXLEN: usize = 1000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Namespace prefix for every stream name
    pub scope: String,
    /// Seconds without a packet before a value reads as STALE
    pub stale_time_s: u64,
    /// TTL of the LATEST packet lookup cache
    pub cache_timeout_ms: u64,
    /// Default acknowledgement timeout for direct command sends
    pub cmd_timeout_s: f64,
    /// Timeout for build-command round trips through the decom service
    pub build_timeout_s: f64,
    /// When set, commands go to this queue unless the caller opts out
    pub default_queue: Option<String>,
    /// Entries retained per stream
    pub stream_maxlen: usize,
    pub poll_interval_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            scope: DEFAULT_SCOPE.to_string(),
            stale_time_s: DEFAULT_STALE_TIME_S,
            cache_timeout_ms: DEFAULT_CACHE_TIMEOUT_MS,
            cmd_timeout_s: DEFAULT_CMD_TIMEOUT_S,
            build_timeout_s: DEFAULT_CMD_TIMEOUT_S,
            default_queue: None,
            stream_maxlen: DEFAULT_STREAM_MAXLEN,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl CoreConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    pub fn cmd_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cmd_timeout_s.max(0.0))
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.build_timeout_s.max(0.0))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Load configuration from a JSON file. Missing fields take their defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> CoreResult<CoreConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: CoreConfig = serde_json::from_reader(reader)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"scope": "TEST", "default_queue": "OPS"}"#).unwrap();
        assert_eq!(config.scope, "TEST");
        assert_eq!(config.default_queue.as_deref(), Some("OPS"));
        assert_eq!(config.stale_time_s, 30);
        assert_eq!(config.stream_maxlen, 1000);
        assert_eq!(config.cmd_timeout(), Duration::from_secs(5));
    }
}
