//! Origin asset sources
//!
//! The origin serves untransformed assets. It backs passthrough requests and
//! supplies the source bytes on a cache miss.

use crate::config::schema::{OriginConfig, OriginKind};
use crate::error::{ImgCacheError, ImgCacheResult};
use crate::store::ByteStream;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Maximum length of a logical asset path
const MAX_PATH_LEN: usize = 1024;

/// An asset fetched from the origin
pub struct SourceAsset {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for SourceAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceAsset")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Where original assets come from
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Fetch an asset by its validated logical path
    async fn fetch(&self, path: &str) -> ImgCacheResult<SourceAsset>;

    /// Human-readable origin name for logs
    fn source_name(&self) -> &'static str;
}

/// Validate and decode a logical asset path taken from a request URL
///
/// Rejects empty paths, traversal and characters outside
/// `[A-Za-z0-9._/-]`, so the result is safe both as a file path below the
/// origin root and as a segment of a cache key.
pub fn validate_asset_path(raw: &str) -> ImgCacheResult<String> {
    let invalid = |reason: &str| ImgCacheError::InvalidAssetPath {
        path: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.is_empty() {
        return Err(invalid("no asset key provided"));
    }
    if raw.len() > MAX_PATH_LEN {
        return Err(invalid("path is too long"));
    }

    let decoded = urlencoding::decode(raw).map_err(|_| invalid("invalid URL encoding"))?;

    if decoded.contains("..")
        || decoded.starts_with('/')
        || decoded.contains("//")
        || decoded.contains('\\')
    {
        return Err(invalid("path traversal detected"));
    }

    // One spelling per asset: `./a.png`, `a/./b.png` and `a.png/` are refused
    if decoded
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(invalid("empty or relative path segment"));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/');
    if !decoded.chars().all(allowed) {
        return Err(invalid("invalid characters in path"));
    }

    Ok(decoded.into_owned())
}

/// Guess a Content-Type from a file extension
pub fn guess_content_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Assets served from a local directory
#[derive(Debug, Clone)]
pub struct LocalAssets {
    root: PathBuf,
}

impl LocalAssets {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl AssetSource for LocalAssets {
    async fn fetch(&self, path: &str) -> ImgCacheResult<SourceAsset> {
        let full = self.root.join(path);
        let file = match fs::File::open(&full).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ImgCacheError::AssetNotFound(path.to_string()))
            }
            Err(e) => return Err(ImgCacheError::upstream(path, e)),
        };

        let metadata = file
            .metadata()
            .await
            .map_err(|e| ImgCacheError::upstream(path, e))?;
        if metadata.is_dir() {
            return Err(ImgCacheError::AssetNotFound(path.to_string()));
        }

        debug!(path = %path, size = metadata.len(), "read asset from disk");

        let owned = path.to_string();
        let body = ReaderStream::new(file)
            .map_err(move |e| ImgCacheError::upstream(owned.clone(), e))
            .boxed();

        Ok(SourceAsset {
            content_type: Some(guess_content_type(path).to_string()),
            content_length: Some(metadata.len()),
            body,
        })
    }

    fn source_name(&self) -> &'static str {
        "local"
    }
}

/// Assets fetched from a remote HTTP origin
#[derive(Debug, Clone)]
pub struct HttpAssets {
    client: Client,
    base_url: String,
}

impl HttpAssets {
    /// Create an origin client; `base_url` is joined with the asset path
    pub fn new(base_url: &str, connect_timeout: Duration) -> ImgCacheResult<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ImgCacheError::Internal(format!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AssetSource for HttpAssets {
    async fn fetch(&self, path: &str) -> ImgCacheResult<SourceAsset> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImgCacheError::upstream(path, e))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ImgCacheError::AssetNotFound(path.to_string())),
            status => {
                return Err(ImgCacheError::upstream(
                    path,
                    format!("unexpected status: {status}"),
                ))
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let owned = path.to_string();
        let body = response
            .bytes_stream()
            .map_err(move |e| ImgCacheError::upstream(owned.clone(), e))
            .boxed();

        Ok(SourceAsset {
            content_type,
            content_length,
            body,
        })
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Create the origin selected in configuration
pub fn create_origin(config: &OriginConfig) -> ImgCacheResult<Arc<dyn AssetSource>> {
    match config.kind {
        OriginKind::Local => Ok(Arc::new(LocalAssets::new(config.root.clone()))),
        OriginKind::Http => {
            let url = config
                .url
                .as_deref()
                .ok_or(ImgCacheError::ConfigMissing("origin.url"))?;
            Ok(Arc::new(HttpAssets::new(
                url,
                Duration::from_secs(config.connect_timeout_secs),
            )?))
        }
    }
}
