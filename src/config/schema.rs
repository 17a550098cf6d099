//! Configuration schema for imgcache
//!
//! Configuration is stored at `~/.config/imgcache/config.toml`

use crate::cache::upload::MIN_PART_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Object store settings
    pub store: StoreConfig,

    /// Origin asset source settings
    pub origin: OriginConfig,

    /// Transform service settings
    pub transformer: TransformerConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: LogFormat,

    /// Record cache commits and clears in the audit log
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            audit_log: true,
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,

    /// Cache-Control stored with derived objects when the transformer sends none
    pub cache_control: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            cache_control: crate::gateway::DEFAULT_CACHE_CONTROL.to_string(),
        }
    }
}

/// Object store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Filesystem directory
    #[default]
    Local,
    /// Process memory, lost on restart
    Memory,
}

/// Object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend to use
    pub backend: StoreBackend,

    /// Root directory for the local backend
    pub root: PathBuf,

    /// Multipart part size in bytes (the store minimum is 5 MiB)
    pub part_size_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            root: crate::config::ConfigManager::state_dir().join("store"),
            part_size_bytes: MIN_PART_SIZE,
        }
    }
}

/// Origin kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    /// Local directory
    #[default]
    Local,
    /// Remote HTTP server
    Http,
}

/// Origin settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Where original assets come from
    pub kind: OriginKind,

    /// Asset directory for the local origin
    pub root: PathBuf,

    /// Base URL for the HTTP origin
    pub url: Option<String>,

    /// Connect timeout for the HTTP origin
    pub connect_timeout_secs: u64,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            kind: OriginKind::Local,
            root: PathBuf::from("./assets"),
            url: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Transform service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Base URL of the transform service
    pub url: String,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
            connect_timeout_secs: 10,
        }
    }
}
