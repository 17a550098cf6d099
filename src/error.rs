//! Error types for imgcache
//!
//! All modules use `ImgCacheResult<T>` as their return type.

use axum::http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for imgcache operations
pub type ImgCacheResult<T> = Result<T, ImgCacheError>;

/// All errors that can occur in imgcache
#[derive(Error, Debug)]
pub enum ImgCacheError {
    // Request errors
    #[error("Invalid preset: {0:?}")]
    InvalidPreset(String),

    #[error("Invalid asset path {path:?}: {reason}")]
    InvalidAssetPath { path: String, reason: String },

    // Origin errors
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Upstream fetch failed for {path}: {reason}")]
    UpstreamFetch { path: String, reason: String },

    // Transform errors
    #[error("Transform failed: {0}")]
    TransformFailed(String),

    // Store errors
    #[error("Store error on {key}: {reason}")]
    Store { key: String, reason: String },

    #[error("Object not found after commit: {0}")]
    NotFoundAfterCommit(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing configuration value: {0}")]
    ConfigMissing(&'static str),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ImgCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a store error for a key
    pub fn store(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Store {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an upstream fetch error for an asset path
    pub fn upstream(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::UpstreamFetch {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// HTTP status this error maps to on the request surface
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPreset(_) | Self::InvalidAssetPath { .. } => StatusCode::BAD_REQUEST,
            Self::AssetNotFound(_) | Self::NotFoundAfterCommit(_) => StatusCode::NOT_FOUND,
            Self::UpstreamFetch { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure was caused by the request rather than the service
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::UpstreamFetch { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: imgcache config init --force"),
            Self::ConfigMissing("origin.url") => Some("Set origin.url or use origin.kind = \"local\""),
            Self::UpstreamFetch { .. } => Some("Check that the origin is reachable"),
            Self::TransformFailed(_) => Some("Check that the transformer service is running"),
            _ => None,
        }
    }
}
