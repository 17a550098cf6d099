//! Cache gateway
//!
//! Serves asset requests. A request without a preset is passed through to
//! the origin untouched. A request with a preset is answered from the store
//! when the derived object exists; otherwise the source is fetched,
//! transformed, uploaded under the cache key and then read back from the
//! store.

use crate::audit::{AuditLog, CACHE_CLEAR, CACHE_COMMIT};
use crate::cache::{build_key, upload_stream, CACHE_PREFIX, MIN_PART_SIZE};
use crate::config::Config;
use crate::error::{ImgCacheError, ImgCacheResult};
use crate::origin::{create_origin, guess_content_type, validate_asset_path, AssetSource};
use crate::preset::{self, Preset, PresetTable};
use crate::store::{self, create_store, ByteStream, HttpMetadata, ObjectStore};
use crate::transform::{create_transformer, Transformer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache-Control stored with derived objects when the transformer sends none
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// How a response was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Read from an existing derived object
    Hit,
    /// Derived object created by this request
    Miss,
    /// No preset requested; served from the origin
    Passthrough,
}

impl CacheStatus {
    /// Value of the `x-cache` response header
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Passthrough => "PASS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header())
    }
}

/// A streamed asset plus the headers to send with it
pub struct AssetResponse {
    pub status: CacheStatus,
    pub content_type: String,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub cache_control: Option<String>,
    pub body: ByteStream,
}

impl fmt::Debug for AssetResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("etag", &self.etag)
            .field("cache_control", &self.cache_control)
            .finish_non_exhaustive()
    }
}

/// Orchestrates preset resolution, store lookups and cache fills
pub struct CacheGateway {
    store: Arc<dyn ObjectStore>,
    origin: Arc<dyn AssetSource>,
    transformer: Arc<dyn Transformer>,
    presets: &'static PresetTable,
    part_size: usize,
    cache_control: String,
    audit: AuditLog,
}

impl CacheGateway {
    /// Gateway over the built-in preset table with default settings
    pub fn new(
        store: Arc<dyn ObjectStore>,
        origin: Arc<dyn AssetSource>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self {
            store,
            origin,
            transformer,
            presets: preset::table(),
            part_size: MIN_PART_SIZE,
            cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            audit: AuditLog::disabled(),
        }
    }

    /// Build the gateway and its backends from configuration
    pub fn from_config(config: &Config) -> ImgCacheResult<Self> {
        let store = create_store(&config.store)?;
        let origin = create_origin(&config.origin)?;
        let transformer = create_transformer(&config.transformer)?;

        debug!(
            store = store.store_name(),
            origin = origin.source_name(),
            transformer = %config.transformer.url,
            "gateway backends created"
        );

        let mut part_size = config.store.part_size_bytes;
        if part_size < MIN_PART_SIZE {
            warn!(
                part_size,
                min = MIN_PART_SIZE,
                "store.part_size_bytes below the store minimum, raising"
            );
            part_size = MIN_PART_SIZE;
        }

        Ok(Self::new(store, origin, transformer)
            .with_part_size(part_size)
            .with_cache_control(&config.server.cache_control)
            .with_audit(AuditLog::new(config)))
    }

    /// Set the multipart part size
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    /// Set the fallback Cache-Control for derived objects
    pub fn with_cache_control(mut self, cache_control: &str) -> Self {
        self.cache_control = cache_control.to_string();
        self
    }

    /// Record commits and clears in `audit`
    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// The backing object store
    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Serve `raw_path` (as taken from the request URL) with query `params`
    pub async fn serve_asset(
        &self,
        raw_path: &str,
        params: &HashMap<String, String>,
    ) -> ImgCacheResult<AssetResponse> {
        let path = validate_asset_path(raw_path)?;

        let Some(preset) = self.presets.resolve(params)? else {
            return self.passthrough(&path).await;
        };

        let key = build_key(&path, preset.name, preset);
        if let Some(hit) = self.lookup(&key).await? {
            debug!(key = %key, "cache hit");
            return Ok(hit);
        }

        debug!(key = %key, "cache miss");
        self.fill(&path, preset, &key).await
    }

    async fn passthrough(&self, path: &str) -> ImgCacheResult<AssetResponse> {
        debug!(path = %path, origin = self.origin.source_name(), "passthrough");
        let source = self.origin.fetch(path).await?;

        Ok(AssetResponse {
            status: CacheStatus::Passthrough,
            content_type: source
                .content_type
                .unwrap_or_else(|| guess_content_type(path).to_string()),
            content_length: source.content_length,
            etag: None,
            cache_control: None,
            body: source.body,
        })
    }

    async fn lookup(&self, key: &str) -> ImgCacheResult<Option<AssetResponse>> {
        let Some(object) = self.store.get(key).await? else {
            return Ok(None);
        };

        let meta = object.meta;
        Ok(Some(AssetResponse {
            status: CacheStatus::Hit,
            content_type: meta
                .http
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            content_length: Some(meta.size),
            etag: Some(meta.http_etag()),
            cache_control: meta.http.cache_control.clone(),
            body: object.body,
        }))
    }

    async fn fill(&self, path: &str, preset: &Preset, key: &str) -> ImgCacheResult<AssetResponse> {
        let source = self.origin.fetch(path).await?;
        let output = self.transformer.transform(path, source, preset).await?;

        let metadata = HttpMetadata {
            content_type: Some(output.content_type),
            cache_control: Some(
                output
                    .cache_control
                    .unwrap_or_else(|| self.cache_control.clone()),
            ),
        };

        // The upload runs detached from the request so a client disconnect
        // cannot stop it between parts; it always completes or aborts, and a
        // completed upload is logged and audited either way.
        let store = Arc::clone(&self.store);
        let audit = self.audit.clone();
        let upload_key = key.to_string();
        let preset_name = preset.name;
        let part_size = self.part_size;
        let body = output.body;
        tokio::spawn(async move {
            let meta =
                upload_stream(store.as_ref(), &upload_key, metadata, body, part_size).await?;

            info!(key = %upload_key, size = meta.size, etag = %meta.etag, "cached derived object");
            audit
                .log(
                    CACHE_COMMIT,
                    &serde_json::json!({
                        "key": upload_key,
                        "preset": preset_name,
                        "size": meta.size,
                        "etag": meta.etag,
                    }),
                )
                .await;

            Ok::<_, ImgCacheError>(meta)
        })
        .await
        .map_err(|e| ImgCacheError::Internal(format!("upload task failed: {e}")))??;

        match self.lookup(key).await? {
            Some(response) => Ok(AssetResponse {
                status: CacheStatus::Miss,
                ..response
            }),
            None => Err(ImgCacheError::NotFoundAfterCommit(key.to_string())),
        }
    }

    /// Delete every derived object, returning how many were removed
    pub async fn clear_cache(&self) -> ImgCacheResult<usize> {
        let deleted = store::clear_prefix(self.store.as_ref(), CACHE_PREFIX).await?;

        info!(deleted, "cleared cache");
        self.audit
            .log(CACHE_CLEAR, &serde_json::json!({ "deleted": deleted }))
            .await;

        Ok(deleted)
    }
}
