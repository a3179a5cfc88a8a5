//! Configuration file management.

use std::path::PathBuf;

use portal_enroll::mail::LinkBuilder;
use portal_enroll::Policy;
use portal_types::{DEFAULT_RESEND_INTERVAL_SECS, DEFAULT_TOKEN_RETENTION_DAYS, DEFAULT_TOKEN_TTL_MINUTES};
use serde::{Deserialize, Serialize};

/// Complete portal daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub links: LinkConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// RPC server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unix socket path. Empty = $data_dir/portal.sock.
    #[serde(default)]
    pub socket_path: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Verification token settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
    /// Days an expired token is kept before the sweep deletes it.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_resend_interval")]
    pub resend_min_interval_secs: u64,
}

/// Where links in emails point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_confirm_path")]
    pub confirm_path: String,
    #[serde(default = "default_poll_path")]
    pub poll_path: String,
}

/// Outgoing mail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_sender")]
    pub sender: String,
    /// Signature line and recovery subject.
    #[serde(default = "default_organisation")]
    pub organisation: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_ttl_minutes() -> u32 {
    DEFAULT_TOKEN_TTL_MINUTES
}

fn default_retention_days() -> u32 {
    DEFAULT_TOKEN_RETENTION_DAYS
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_resend_interval() -> u64 {
    DEFAULT_RESEND_INTERVAL_SECS
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_confirm_path() -> String {
    "/enroll/verify".to_string()
}

fn default_poll_path() -> String {
    "/enroll/waiting".to_string()
}

fn default_sender() -> String {
    "no-reply@localhost".to_string()
}

fn default_organisation() -> String {
    "Training Portal".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
            resend_min_interval_secs: default_resend_interval(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            confirm_path: default_confirm_path(),
            poll_path: default_poll_path(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            sender: default_sender(),
            organisation: default_organisation(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl PortalConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: PortalConfig = toml::from_str(content)?;
        if config.tokens.ttl_minutes == 0 {
            anyhow::bail!("tokens.ttl_minutes must be at least 1");
        }
        if config.tokens.sweep_interval_secs == 0 {
            anyhow::bail!("tokens.sweep_interval_secs must be at least 1");
        }
        Ok(config)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        if self.server.socket_path.is_empty() {
            self.data_dir().join("portal.sock")
        } else {
            PathBuf::from(&self.server.socket_path)
        }
    }

    pub fn policy(&self) -> Policy {
        Policy {
            token_ttl_minutes: self.tokens.ttl_minutes,
            resend_min_interval_secs: self.tokens.resend_min_interval_secs,
            retention_days: self.tokens.retention_days,
        }
    }

    pub fn link_builder(&self) -> LinkBuilder {
        LinkBuilder::new(&self.links.base_url, &self.links.confirm_path, &self.links.poll_path)
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var("PORTAL_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("PORTAL_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Portal")
        }
        #[cfg(target_os = "linux")]
        {
            dirs_fallback(".portal")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Portal")
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            dirs_fallback(".portal")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/portal"))
}
