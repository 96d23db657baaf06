//! Client configuration loading: JSON file, environment overrides, built-in defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    dto::round::ActivityId,
    services::{
        api_client::DEFAULT_TIMEOUT,
        motion::{DEFAULT_MIN_INTERVAL_MS, DEFAULT_SENSITIVITY, MotionConfig},
        transport::TransportConfig,
    },
};

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/client.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_SHAKE_CONFIG_PATH";
/// Environment variable carrying the attendee token.
const TOKEN_ENV: &str = "LIVE_SHAKE_TOKEN";
/// Environment variable selecting the activity to join.
const ACTIVITY_ID_ENV: &str = "LIVE_SHAKE_ACTIVITY_ID";

const DEFAULT_API_BASE_URL: &str = "http://localhost:9001";
const DEFAULT_PUSH_ENDPOINT: &str = "ws://localhost:9001/ws";
const DEFAULT_STORAGE_PREFIX: &str = "live_";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub endpoint: String,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the scope files; in-memory storage when absent.
    pub dir: Option<PathBuf>,
    pub prefix: String,
}

/// Immutable runtime configuration of the attendee client.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub push: PushConfig,
    pub motion: MotionConfig,
    pub storage: StorageConfig,
    pub activity_id: Option<ActivityId>,
    pub token: Option<String>,
    /// Fallback polling period for deployments without push delivery.
    pub poll_interval: Option<Duration>,
}

#[derive(Debug, Error)]
enum ConfigError {
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid values: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults,
    /// then apply environment overrides.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json_str(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded client config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_overrides(
            non_empty_env(TOKEN_ENV),
            non_empty_env(ACTIVITY_ID_ENV),
        )
    }

    fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(contents)?;
        raw.validate()?;
        Ok(raw.into())
    }

    fn with_overrides(mut self, token: Option<String>, activity_id: Option<String>) -> Self {
        if let Some(token) = token {
            self.token = Some(token);
        }
        if let Some(activity_id) = activity_id {
            self.activity_id = Some(ActivityId::new(activity_id));
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    #[validate(nested)]
    api: RawApi,
    #[validate(nested)]
    push: RawPush,
    #[validate(nested)]
    motion: RawMotion,
    storage: RawStorage,
    activity_id: Option<ActivityId>,
    token: Option<String>,
    #[validate(range(min = 500))]
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
struct RawApi {
    #[validate(url)]
    base_url: String,
    #[validate(range(min = 1))]
    timeout_ms: u64,
}

impl Default for RawApi {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.into(),
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
struct RawPush {
    #[validate(url)]
    endpoint: String,
    reconnect: bool,
    #[validate(range(min = 1))]
    max_reconnect_attempts: u32,
    #[validate(range(min = 1))]
    reconnect_interval_ms: u64,
    #[validate(range(min = 1))]
    heartbeat_interval_ms: u64,
}

impl Default for RawPush {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            endpoint: DEFAULT_PUSH_ENDPOINT.into(),
            reconnect: transport.reconnect_enabled,
            max_reconnect_attempts: transport.max_reconnect_attempts,
            reconnect_interval_ms: transport.reconnect_interval.as_millis() as u64,
            heartbeat_interval_ms: transport.heartbeat_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
struct RawMotion {
    #[validate(range(exclusive_min = 0.0))]
    sensitivity: f64,
    #[validate(range(min = 0))]
    min_interval_ms: i64,
}

impl Default for RawMotion {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStorage {
    dir: Option<PathBuf>,
    prefix: String,
}

impl Default for RawStorage {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: DEFAULT_STORAGE_PREFIX.into(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            api: ApiConfig {
                base_url: raw.api.base_url,
                timeout: Duration::from_millis(raw.api.timeout_ms),
            },
            push: PushConfig {
                endpoint: raw.push.endpoint,
                transport: TransportConfig {
                    reconnect_enabled: raw.push.reconnect,
                    max_reconnect_attempts: raw.push.max_reconnect_attempts,
                    reconnect_interval: Duration::from_millis(raw.push.reconnect_interval_ms),
                    heartbeat_interval: Duration::from_millis(raw.push.heartbeat_interval_ms),
                },
            },
            motion: MotionConfig {
                sensitivity: raw.motion.sensitivity,
                min_interval_ms: raw.motion.min_interval_ms,
            },
            storage: StorageConfig {
                dir: raw.storage.dir,
                prefix: raw.storage.prefix,
            },
            activity_id: raw.activity_id,
            token: raw.token.filter(|token| !token.is_empty()),
            poll_interval: raw.poll_interval_ms.map(Duration::from_millis),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}
