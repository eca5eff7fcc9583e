use crate::cloud_storage::S3Config;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_IMPORT_DIR: &str = "./local_import";
const DEFAULT_CHUNK_SIZE: usize = 5000;
const DEFAULT_MAX_IMPORT_SIZE_MB: u64 = 4096;
const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 5;
const DEFAULT_S3_BUCKET: &str = "chat-media";
const DEFAULT_S3_REGION: &str = "us-east-1";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration
/// Loaded from the environment, with a `.env` file applied first when present
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: PathBuf,
    /// Directory scanned for export archives
    pub import_dir: PathBuf,
    /// Parent for extraction directories (system temp dir when None)
    pub work_dir: Option<PathBuf>,
    /// Records per transaction chunk
    pub import_chunk_size: usize,
    pub max_import_size_mb: u64,
    pub progress_interval: Duration,
    /// Whether to use local filesystem storage instead of S3
    pub use_local_storage: bool,
    /// Path for local storage
    pub local_storage_path: Option<PathBuf>,
    /// Present unless local storage is enabled
    pub s3: Option<S3Config>,
}

impl Config {
    /// Load configuration from `.env` (if any) and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let use_local_storage = get("CHATVAULT_USE_LOCAL_STORAGE")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);
        let local_storage_path = get("CHATVAULT_LOCAL_STORAGE_PATH").map(PathBuf::from);

        let import_chunk_size = parse_number(
            "CHATVAULT_IMPORT_CHUNK_SIZE",
            get("CHATVAULT_IMPORT_CHUNK_SIZE"),
            DEFAULT_CHUNK_SIZE,
        )?;
        if import_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "CHATVAULT_IMPORT_CHUNK_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let s3 = if use_local_storage {
            None
        } else {
            Some(S3Config {
                bucket_name: get("S3_BUCKET").unwrap_or_else(|| DEFAULT_S3_BUCKET.to_string()),
                region: get("S3_REGION").unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                access_key_id: get("S3_ACCESS_KEY_ID")
                    .ok_or(ConfigError::Missing("S3_ACCESS_KEY_ID"))?,
                secret_access_key: get("S3_SECRET_ACCESS_KEY")
                    .ok_or(ConfigError::Missing("S3_SECRET_ACCESS_KEY"))?,
                endpoint_url: get("S3_ENDPOINT_URL"),
            })
        };

        Ok(Config {
            database_path: get("CHATVAULT_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_database_path),
            import_dir: get("CHATVAULT_IMPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMPORT_DIR)),
            work_dir: get("CHATVAULT_WORK_DIR").map(PathBuf::from),
            import_chunk_size,
            max_import_size_mb: parse_number(
                "CHATVAULT_MAX_IMPORT_SIZE_MB",
                get("CHATVAULT_MAX_IMPORT_SIZE_MB"),
                DEFAULT_MAX_IMPORT_SIZE_MB,
            )?,
            progress_interval: Duration::from_secs(parse_number(
                "CHATVAULT_PROGRESS_INTERVAL_SECS",
                get("CHATVAULT_PROGRESS_INTERVAL_SECS"),
                DEFAULT_PROGRESS_INTERVAL_SECS,
            )?),
            use_local_storage,
            local_storage_path,
            s3,
        })
    }

    pub fn max_import_bytes(&self) -> u64 {
        self.max_import_size_mb.saturating_mul(1024 * 1024)
    }

    /// Root directory for the filesystem object store
    pub fn storage_root(&self) -> PathBuf {
        if let Some(path) = &self.local_storage_path {
            return path.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("chatvault").join("media"))
            .unwrap_or_else(|| PathBuf::from("chatvault-media"))
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("chatvault").join("chatvault.db"))
        .unwrap_or_else(|| PathBuf::from("chatvault.db"))
}

fn parse_number<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_local_storage() {
        let config = config_from(&[("CHATVAULT_USE_LOCAL_STORAGE", "TRUE")]).unwrap();

        assert!(config.use_local_storage);
        assert!(config.s3.is_none());
        assert_eq!(config.import_dir, PathBuf::from("./local_import"));
        assert_eq!(config.import_chunk_size, 5000);
        assert_eq!(config.max_import_bytes(), 4096 * 1024 * 1024);
        assert_eq!(config.progress_interval, Duration::from_secs(5));
        assert_eq!(config.work_dir, None);
    }

    #[test]
    fn test_s3_settings() {
        let config = config_from(&[
            ("S3_ACCESS_KEY_ID", "minioadmin"),
            ("S3_SECRET_ACCESS_KEY", "minioadmin"),
            ("S3_ENDPOINT_URL", "http://localhost:9000"),
            ("CHATVAULT_IMPORT_CHUNK_SIZE", "250"),
        ])
        .unwrap();

        let s3 = config.s3.unwrap();
        assert_eq!(s3.bucket_name, "chat-media");
        assert_eq!(s3.region, "us-east-1");
        assert_eq!(s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.import_chunk_size, 250);
    }

    #[test]
    fn test_missing_s3_credentials() {
        assert_eq!(
            config_from(&[("S3_ACCESS_KEY_ID", "key")]).unwrap_err(),
            ConfigError::Missing("S3_SECRET_ACCESS_KEY")
        );
    }

    #[test]
    fn test_invalid_numbers() {
        let err = config_from(&[
            ("CHATVAULT_USE_LOCAL_STORAGE", "true"),
            ("CHATVAULT_IMPORT_CHUNK_SIZE", "lots"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "CHATVAULT_IMPORT_CHUNK_SIZE",
                ..
            }
        ));

        let zero = config_from(&[
            ("CHATVAULT_USE_LOCAL_STORAGE", "true"),
            ("CHATVAULT_IMPORT_CHUNK_SIZE", "0"),
        ]);
        assert!(zero.is_err());
    }
}
