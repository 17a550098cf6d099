//! imgcache settings file
//!
//! One TOML file (`<config_dir>/imgcache/config.toml` unless `-c` or
//! `IMGCACHE_CONFIG` points elsewhere) describes the origin, the object
//! store, the transformer and the listener. A missing file is not an error:
//! every section has a working local default. Runtime state such as the
//! local store and the audit log lives under `<state_dir>/imgcache/`.

pub mod schema;

pub use schema::Config;

use crate::error::{ImgCacheError, ImgCacheResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const APP_DIR: &str = "imgcache";

/// Locates, reads and writes the settings file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Settings file at the platform default location
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Settings file at an explicit location (`-c` / `IMGCACHE_CONFIG`)
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml")
    }

    /// Root for runtime state: the default local store and the audit log
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }

    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Read the settings file, falling back to built-in defaults when absent
    pub async fn load(&self) -> ImgCacheResult<Config> {
        match fs::read_to_string(&self.config_path).await {
            Ok(content) => Self::parse(&self.config_path, &content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    path = %self.config_path.display(),
                    "no imgcache settings file, running with built-in defaults"
                );
                Ok(Config::default())
            }
            Err(e) => Err(ImgCacheError::io(
                format!("reading settings {}", self.config_path.display()),
                e,
            )),
        }
    }

    /// Read settings from a file that must exist
    pub async fn load_from_file(&self, path: &Path) -> ImgCacheResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ImgCacheError::io(format!("reading settings {}", path.display()), e))?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> ImgCacheResult<Config> {
        toml::from_str(content).map_err(|e| ImgCacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write settings, creating the parent directory if needed
    pub async fn save(&self, config: &Config) -> ImgCacheResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ImgCacheError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ImgCacheError::io(
                format!("writing settings {}", self.config_path.display()),
                e,
            )
        })?;

        info!(path = %self.config_path.display(), "wrote imgcache settings");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.toml");
        let manager = ConfigManager::with_path(path);

        let config = manager.load().await.unwrap();
        assert_eq!(config.transformer.url, "http://127.0.0.1:3000");
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let manager = ConfigManager::with_path(path);

        let mut config = Config::default();
        config.server.bind = "0.0.0.0:9000".to_string();

        manager.save(&config).await.unwrap();
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.server.bind, "0.0.0.0:9000");
    }

    #[tokio::test]
    async fn invalid_file_reports_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[store]\npart_size_bytes = \"big\"").unwrap();

        let err = ConfigManager::with_path(path.clone()).load().await.unwrap_err();
        assert!(matches!(err, ImgCacheError::ConfigInvalid { path: p, .. } if p == path));
    }

    #[tokio::test]
    async fn explicit_file_must_exist() {
        let temp = TempDir::new().unwrap();
        let manager = ConfigManager::with_path(temp.path().join("config.toml"));

        let err = manager
            .load_from_file(&temp.path().join("missing.toml"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImgCacheError::Io { .. }));
    }

    #[test]
    fn runtime_state_lives_under_app_dir() {
        let audit = ConfigManager::audit_log_path();
        assert!(audit.ends_with("imgcache/audit.log"));
        assert!(ConfigManager::default_config_path().ends_with("imgcache/config.toml"));
    }
}
