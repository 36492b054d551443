use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::PrintSettings;

const DEFAULT_CONFIG_FILE: &str = "fancam-print.toml";
const CONFIG_PATH_ENV: &str = "FANCAM_CONFIG";
const ENV_PREFIX: &str = "FANCAM_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    /// Defaults applied to print options the caller leaves out.
    pub print: PrintSettings,
    pub retry: RetryConfig,
    pub token_cache: TokenCacheConfig,
    /// Pause between items of a batch.
    pub batch_delay_ms: u64,
    pub http_bind: SocketAddr,
    /// Directory the print API resolves photo ids against.
    pub photo_dir: PathBuf,
    /// SQLite file for the local job ledger. Unset disables the ledger.
    pub ledger_path: Option<PathBuf>,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            print: PrintSettings::default(),
            retry: RetryConfig::default(),
            token_cache: TokenCacheConfig::default(),
            batch_delay_ms: 1000,
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            photo_dir: PathBuf::from("photos"),
            ledger_path: None,
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider host, with or without a scheme. Bare hosts get `https://`.
    pub host: String,
    pub client_id: String,
    pub client_secret: String,
    /// Email-like address of the target printer.
    pub device_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            host: "api.epsonconnect.com".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            device_id: None,
            request_timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.contains("://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// Reuse bearer tokens across operations. Off means every operation authenticates.
    pub enabled: bool,
    pub max_ttl_secs: u64,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_ttl_secs: 1800,
        }
    }
}

/// Values supplied on the command line. Unset fields leave lower layers untouched.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "ProviderOverrides::is_empty")]
    pub provider: ProviderOverrides,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_bind: Option<SocketAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_logs: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
pub struct ProviderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl ProviderOverrides {
    fn is_empty(&self) -> bool {
        self.device_id.is_none()
    }
}

impl AppConfig {
    /// Load defaults, then the TOML file, then `FANCAM_*` env vars, then CLI overrides.
    pub fn new(config_path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };

        Self::figment(&path)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    /// Defaults layered under a TOML file, without the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::figment(path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::file(path))
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// TOML rendering with the client secret masked.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.provider.client_secret.is_empty() {
            shown.provider.client_secret = "********".to_string();
        }
        toml::to_string_pretty(&shown).context("Failed to serialize config")
    }
}
