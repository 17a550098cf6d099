//! Filesystem object store
//!
//! Layout under the store root:
//!
//! | Path | Contents |
//! |------|----------|
//! | `meta/<key>.json` | sidecar: `ObjectMeta` plus the name of its data file |
//! | `data/<upload id>` | committed object bytes |
//! | `uploads/<id>/<part>` | parts of an open multipart session |
//!
//! Completion assembles the parts into `data/<upload id>`, a name no reader
//! knows yet, and then renames the sidecar into `meta/`. That rename is the
//! commit: a reader sees either the previous sidecar and its data or the new
//! sidecar and its data, never a mix.

use crate::error::{ImgCacheError, ImgCacheResult};
use crate::store::{
    multipart_etag, part_etag, validate_parts, HttpMetadata, MultipartSession, ObjectMeta,
    ObjectStore, PartToken, StoredObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Minimum size of every part except the last, matching S3-compatible stores
pub const LOCAL_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

const SIDECAR_SUFFIX: &str = ".json";

/// Committed object descriptor as written to `meta/`
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    /// File name under `data/`
    data: String,
    meta: ObjectMeta,
}

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    min_part_size: u64,
}

impl LocalStore {
    /// Create a store rooted at `root`; directories are created lazily
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            min_part_size: LOCAL_MIN_PART_SIZE,
        }
    }

    /// Override the minimum part size
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.root.join("data").join(name)
    }

    fn meta_path(&self, key: &str) -> ImgCacheResult<PathBuf> {
        Ok(self
            .meta_dir()
            .join(format!("{}{}", checked_key(key)?, SIDECAR_SUFFIX)))
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join("uploads").join(upload_id)
    }

    async fn read_sidecar(&self, key: &str) -> ImgCacheResult<Option<Sidecar>> {
        let path = self.meta_path(key)?;
        match fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ImgCacheError::store(key, e)),
        }
    }
}

/// Reject keys that would escape the store root
fn checked_key(key: &str) -> ImgCacheResult<&str> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");

    if invalid {
        return Err(ImgCacheError::store(key, "key is not a valid relative path"));
    }
    Ok(key)
}

async fn ensure_parent(path: &Path, key: &str) -> ImgCacheResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ImgCacheError::store(key, e))?;
    }
    Ok(())
}

async fn remove_if_exists(path: &Path, key: &str) -> ImgCacheResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ImgCacheError::store(key, e)),
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &str) -> ImgCacheResult<Option<StoredObject>> {
        let Some(sidecar) = self.read_sidecar(key).await? else {
            return Ok(None);
        };

        let path = self.data_path(&sidecar.data);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            // Replaced or deleted between reading the sidecar and opening
            // its data file.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ImgCacheError::store(key, e)),
        };

        let owned_key = key.to_string();
        let body = ReaderStream::new(file)
            .map_err(move |e| ImgCacheError::store(owned_key.clone(), e))
            .boxed();

        Ok(Some(StoredObject {
            meta: sidecar.meta,
            body,
        }))
    }

    async fn delete(&self, key: &str) -> ImgCacheResult<()> {
        let Some(sidecar) = self.read_sidecar(key).await? else {
            return Ok(());
        };

        remove_if_exists(&self.meta_path(key)?, key).await?;
        remove_if_exists(&self.data_path(&sidecar.data), key).await
    }

    async fn list(&self, prefix: &str) -> ImgCacheResult<Vec<String>> {
        let meta_dir = self.meta_dir();
        let mut keys = Vec::new();
        let mut pending = vec![meta_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(ImgCacheError::store(prefix, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| ImgCacheError::store(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| ImgCacheError::store(prefix, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&meta_dir) else {
                    continue;
                };
                let joined = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let Some(key) = joined.strip_suffix(SIDECAR_SUFFIX) else {
                    continue;
                };

                if key.starts_with(prefix) {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn begin_multipart(
        &self,
        key: &str,
        metadata: HttpMetadata,
    ) -> ImgCacheResult<Box<dyn MultipartSession>> {
        checked_key(key)?;

        let upload_id = Uuid::new_v4().to_string();
        let dir = self.upload_dir(&upload_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ImgCacheError::store(key, e))?;

        debug!(key = %key, upload_id = %upload_id, "opened multipart upload");

        Ok(Box::new(LocalUpload {
            store: self.clone(),
            key: key.to_string(),
            upload_id,
            dir,
            metadata,
            part_sizes: Vec::new(),
        }))
    }

    fn store_name(&self) -> &'static str {
        "local"
    }
}

struct LocalUpload {
    store: LocalStore,
    key: String,
    upload_id: String,
    dir: PathBuf,
    metadata: HttpMetadata,
    part_sizes: Vec<(u32, u64)>,
}

impl LocalUpload {
    fn part_path(&self, part_number: u32) -> PathBuf {
        self.dir.join(format!("{part_number:05}"))
    }

    fn err(&self, reason: impl ToString) -> ImgCacheError {
        ImgCacheError::store(&self.key, reason)
    }

    /// Concatenate parts into a temp file, returning its path and size
    async fn assemble(&self, parts: &[PartToken]) -> ImgCacheResult<(PathBuf, u64)> {
        let staged = self.dir.join("assembled");
        let mut out = fs::File::create(&staged).await.map_err(|e| self.err(e))?;
        let mut size = 0u64;

        for part in parts {
            let mut input = fs::File::open(self.part_path(part.part_number))
                .await
                .map_err(|e| self.err(format!("part {}: {e}", part.part_number)))?;
            size += tokio::io::copy(&mut input, &mut out)
                .await
                .map_err(|e| self.err(e))?;
        }

        out.flush().await.map_err(|e| self.err(e))?;
        out.sync_all().await.map_err(|e| self.err(e))?;
        Ok((staged, size))
    }

    /// Point the key at `sidecar` with a single rename
    async fn publish(&self, sidecar: &Sidecar) -> ImgCacheResult<()> {
        let meta_path = self.store.meta_path(&self.key)?;
        ensure_parent(&meta_path, &self.key).await?;

        let staged = self.dir.join("sidecar.json");
        fs::write(&staged, serde_json::to_vec(sidecar)?)
            .await
            .map_err(|e| self.err(e))?;
        fs::rename(&staged, &meta_path)
            .await
            .map_err(|e| self.err(e))
    }
}

#[async_trait]
impl MultipartSession for LocalUpload {
    fn key(&self) -> &str {
        &self.key
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    async fn upload_part(&mut self, part_number: u32, data: Bytes) -> ImgCacheResult<PartToken> {
        fs::write(self.part_path(part_number), &data)
            .await
            .map_err(|e| self.err(format!("part {part_number}: {e}")))?;

        self.part_sizes.retain(|(n, _)| *n != part_number);
        self.part_sizes.push((part_number, data.len() as u64));

        Ok(PartToken {
            part_number,
            etag: part_etag(&data),
        })
    }

    async fn complete(&mut self, parts: Vec<PartToken>) -> ImgCacheResult<ObjectMeta> {
        let mut sizes = Vec::with_capacity(parts.len());
        for part in &parts {
            let size = self
                .part_sizes
                .iter()
                .find(|(n, _)| *n == part.part_number)
                .map(|(_, size)| *size)
                .ok_or_else(|| self.err(format!("part {} missing", part.part_number)))?;
            sizes.push(size);
        }
        validate_parts(&self.key, &parts, &sizes, self.store.min_part_size)?;

        let (staged, size) = self.assemble(&parts).await?;

        let sidecar = Sidecar {
            data: self.upload_id.clone(),
            meta: ObjectMeta {
                key: self.key.clone(),
                size,
                etag: multipart_etag(&parts),
                http: self.metadata.clone(),
                uploaded_at: Utc::now(),
            },
        };

        // The data file name is unique to this upload, so nothing reads it
        // until the sidecar is published.
        let data_path = self.store.data_path(&sidecar.data);
        ensure_parent(&data_path, &self.key).await?;
        fs::rename(&staged, &data_path)
            .await
            .map_err(|e| self.err(e))?;

        let previous = self.store.read_sidecar(&self.key).await.ok().flatten();

        if let Err(e) = self.publish(&sidecar).await {
            remove_if_exists(&data_path, &self.key).await?;
            return Err(e);
        }

        if let Some(previous) = previous.filter(|p| p.data != sidecar.data) {
            remove_if_exists(&self.store.data_path(&previous.data), &self.key).await?;
        }

        if let Err(e) = fs::remove_dir_all(&self.dir).await {
            warn!(upload_id = %self.upload_id, "failed to remove upload dir: {}", e);
        }

        debug!(key = %self.key, size, parts = parts.len(), "completed multipart upload");
        Ok(sidecar.meta)
    }

    async fn abort(&mut self) -> ImgCacheResult<()> {
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.err(e)),
        }
    }
}
