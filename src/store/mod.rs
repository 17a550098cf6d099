//! Object store abstraction
//!
//! Durable key/value storage for derived assets. Objects are written only
//! through multipart sessions because the size of a transformed image is
//! unknown until its stream ends.
//!
//! Backends:
//! - `LocalStore`: filesystem directory, atomic rename on completion
//! - `InMemoryStore`: process-local map with operation counters

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::{InMemoryStore, StoreStats};

use crate::config::schema::{StoreBackend, StoreConfig};
use crate::error::{ImgCacheError, ImgCacheResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Streamed object body
pub type ByteStream = BoxStream<'static, ImgCacheResult<Bytes>>;

/// HTTP metadata stored alongside an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// Descriptor of a committed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub etag: String,
    #[serde(default)]
    pub http: HttpMetadata,
    pub uploaded_at: DateTime<Utc>,
}

impl ObjectMeta {
    /// Quoted etag suitable for an `ETag` header
    pub fn http_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}

/// An object read from the store
pub struct StoredObject {
    pub meta: ObjectMeta,
    pub body: ByteStream,
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Receipt for one committed part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartToken {
    pub part_number: u32,
    pub etag: String,
}

/// Durable content-addressed object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object; a missing key is `Ok(None)`
    async fn get(&self, key: &str) -> ImgCacheResult<Option<StoredObject>>;

    /// Delete an object; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> ImgCacheResult<()>;

    /// List keys starting with `prefix`, in lexicographic order
    async fn list(&self, prefix: &str) -> ImgCacheResult<Vec<String>>;

    /// Open a multipart upload that will commit to `key`
    async fn begin_multipart(
        &self,
        key: &str,
        metadata: HttpMetadata,
    ) -> ImgCacheResult<Box<dyn MultipartSession>>;

    /// Human-readable backend name for logs
    fn store_name(&self) -> &'static str;
}

/// Store side of one multipart upload
///
/// Parts must be uploaded with strictly increasing numbers starting at 1.
/// Nothing is visible at the target key until `complete` succeeds.
#[async_trait]
pub trait MultipartSession: Send {
    /// Key the session commits to
    fn key(&self) -> &str;

    /// Store-assigned session id
    fn upload_id(&self) -> &str;

    /// Upload one part
    async fn upload_part(&mut self, part_number: u32, data: Bytes) -> ImgCacheResult<PartToken>;

    /// Finalize all parts into a single object
    async fn complete(&mut self, parts: Vec<PartToken>) -> ImgCacheResult<ObjectMeta>;

    /// Release all partial state
    async fn abort(&mut self) -> ImgCacheResult<()>;
}

/// Check a completion request: parts numbered 1..=n in order, every part
/// except the last at least `min_part_size` bytes
pub(crate) fn validate_parts(
    key: &str,
    parts: &[PartToken],
    sizes: &[u64],
    min_part_size: u64,
) -> ImgCacheResult<()> {
    if parts.is_empty() {
        return Err(ImgCacheError::store(key, "multipart upload has no parts"));
    }

    for (idx, part) in parts.iter().enumerate() {
        let expected = idx as u32 + 1;
        if part.part_number != expected {
            return Err(ImgCacheError::store(
                key,
                format!(
                    "part {} out of order (expected {})",
                    part.part_number, expected
                ),
            ));
        }
    }

    if let Some((_, rest)) = sizes.split_last() {
        if let Some(pos) = rest.iter().position(|size| *size < min_part_size) {
            return Err(ImgCacheError::store(
                key,
                format!(
                    "part {} is {} bytes, below the {} byte minimum",
                    pos + 1,
                    rest[pos],
                    min_part_size
                ),
            ));
        }
    }

    Ok(())
}

/// Etag for a single part
pub(crate) fn part_etag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(&digest[..16])
}

/// Etag for a completed multipart object: digest of part etags plus count
pub(crate) fn multipart_etag(parts: &[PartToken]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.etag.as_bytes());
    }
    let digest = hasher.finalize();
    format!("{}-{}", hex::encode(&digest[..16]), parts.len())
}

/// Delete every object under `prefix`, returning the number deleted
pub async fn clear_prefix(store: &dyn ObjectStore, prefix: &str) -> ImgCacheResult<usize> {
    let keys = store.list(prefix).await?;
    for key in &keys {
        debug!(key = %key, "deleting");
        store.delete(key).await?;
    }
    Ok(keys.len())
}

/// Create the store backend selected in configuration
pub fn create_store(config: &StoreConfig) -> ImgCacheResult<Arc<dyn ObjectStore>> {
    match config.backend {
        StoreBackend::Local => Ok(Arc::new(LocalStore::new(config.root.clone()))),
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
    }
}
