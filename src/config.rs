use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::storage::BackendConfig;

const DEFAULT_CONFIG_PATH: &str = "blobway.toml";

/// Top-level application configuration loaded from file + environment.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub account: AccountSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load configuration from `BLOBWAY_CONFIG` (or `blobway.toml`) and the
    /// environment.
    pub fn load() -> Result<Self> {
        let config_path =
            env::var("BLOBWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file path and the environment.
    pub fn load_from(config_path: &str) -> Result<Self> {
        let mut builder = config::Config::builder();

        if Path::new(config_path).exists() {
            builder = builder.add_source(config::File::from(PathBuf::from(config_path)));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BLOBWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .with_context(|| format!("failed to read configuration from {}", config_path))?;
        let mut config: Self = settings.try_deserialize()?;

        // Conventional credential variables win over file values
        if let Ok(account) = env::var("STORAGE_ACCOUNT") {
            config.account.name = account;
        }
        if let Ok(access_key) = env::var("STORAGE_ACCESS_KEY") {
            config.account.access_key = access_key;
        }

        if config.logging.level.trim().is_empty() {
            config.logging.level = "info".to_string();
        }

        Ok(config)
    }

    /// Resolve the backend selection.
    pub fn backend(&self) -> Result<BackendConfig> {
        self.storage.to_runtime()
    }
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct AccountSection {
    pub name: String,
    pub access_key: String,
}

impl std::fmt::Debug for AccountSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSection")
            .field("name", &self.name)
            .field("access_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackendKind,
    pub local: Option<LocalStorageSection>,
    pub s3: Option<S3StorageSection>,
}

impl StorageSection {
    pub fn to_runtime(&self) -> Result<BackendConfig> {
        match self.backend {
            StorageBackendKind::Local => {
                let local = self.local.clone().unwrap_or_default();

                if local.root_path.trim().is_empty() {
                    bail!("storage.local.root_path must be specified");
                }

                Ok(BackendConfig::Local {
                    root_path: local.root_path,
                })
            }
            StorageBackendKind::S3 => {
                let s3 = self.s3.clone().unwrap_or_default();

                if s3.region.trim().is_empty() {
                    bail!("storage.s3.region must be specified");
                }
                if s3.operation_timeout_secs == Some(0) {
                    bail!("storage.s3.operation_timeout_secs must be greater than zero");
                }

                Ok(BackendConfig::S3 {
                    region: s3.region,
                    endpoint: s3.endpoint.and_then(|e| {
                        let trimmed = e.trim();
                        if trimmed.is_empty() {
                            None
                        } else {
                            Some(trimmed.to_string())
                        }
                    }),
                    force_path_style: s3.force_path_style,
                    operation_timeout_secs: s3.operation_timeout_secs,
                })
            }
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::S3,
            local: None,
            s3: Some(S3StorageSection::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Local,
    #[default]
    S3,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalStorageSection {
    pub root_path: String,
}

impl Default for LocalStorageSection {
    fn default() -> Self {
        Self {
            root_path: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct S3StorageSection {
    pub region: String,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub operation_timeout_secs: Option<u64>,
}

impl Default for S3StorageSection {
    fn default() -> Self {
        Self {
            region: crate::storage::s3::DEFAULT_REGION.to_string(),
            endpoint: None,
            force_path_style: false,
            operation_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}
