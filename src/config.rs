//! Application-level configuration: the JSON options file plus the storage backend
//! selection taken from the environment.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SURVEY_BOARD_CONFIG_PATH";
/// Environment variable selecting the storage backend.
const STORAGE_BACKEND_ENV: &str = "STORAGE_BACKEND";

const DEFAULT_SEED_PATH: &str = "config/seed.json";
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_WRONG_FLASH_MS: u64 = 2_000;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Question catalogue loaded when the store holds no question.
    pub seed_path: Option<PathBuf>,
    /// Upper bound for one controller operation, store round-trips included.
    pub operation_timeout: Duration,
    /// How long a controller waits for the mirror to reflect its own writes.
    pub settle_timeout: Duration,
    /// Duration of the board flash shown on a wrong answer.
    pub wrong_flash: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        operation_timeout_ms = app_config.operation_timeout.as_millis() as u64,
                        seed = ?app_config.seed_path,
                        "loaded configuration"
                    );
                    app_config
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
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    seed_path: Option<String>,
    operation_timeout_ms: Option<u64>,
    settle_timeout_ms: Option<u64>,
    wrong_flash_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let seed_path = match value.seed_path {
            Some(path) if path.is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_SEED_PATH)),
        };
        Self {
            seed_path,
            operation_timeout: Duration::from_millis(
                value
                    .operation_timeout_ms
                    .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
            ),
            settle_timeout: Duration::from_millis(
                value.settle_timeout_ms.unwrap_or(DEFAULT_SETTLE_TIMEOUT_MS),
            ),
            wrong_flash: Duration::from_millis(
                value.wrong_flash_ms.unwrap_or(DEFAULT_WRONG_FLASH_MS),
            ),
        }
    }
}

/// Storage backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// In-process store; state is lost on restart.
    Memory,
    /// CouchDB over HTTP.
    #[cfg(feature = "couch-store")]
    Couch,
    /// MongoDB replica set.
    #[cfg(feature = "mongo-store")]
    Mongo,
}

impl StorageBackend {
    /// Read `STORAGE_BACKEND`, defaulting to the in-process store.
    pub fn from_env() -> Self {
        let raw = env::var(STORAGE_BACKEND_ENV).unwrap_or_default();
        Self::parse(&raw).unwrap_or_else(|| {
            warn!(value = %raw, "unknown storage backend; using in-memory store");
            StorageBackend::Memory
        })
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Some(StorageBackend::Memory),
            #[cfg(feature = "couch-store")]
            "couch" | "couchdb" => Some(StorageBackend::Couch),
            #[cfg(feature = "mongo-store")]
            "mongo" | "mongodb" => Some(StorageBackend::Mongo),
            _ => None,
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
