//! In-memory object store
//!
//! Keeps committed objects and pending uploads in process memory. Every
//! operation is counted in [`StoreStats`], and a part-upload failure can be
//! injected, which makes this backend the test double for the gateway.

use crate::error::{ImgCacheError, ImgCacheResult};
use crate::store::{
    multipart_etag, part_etag, validate_parts, ByteStream, HttpMetadata, MultipartSession,
    ObjectMeta, ObjectStore, PartToken, StoredObject,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream;
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Chunk size used when streaming an object back out
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub gets: usize,
    pub deletes: usize,
    pub lists: usize,
    pub uploads_begun: usize,
    pub parts_uploaded: usize,
    pub uploads_completed: usize,
    pub uploads_aborted: usize,
}

impl StoreStats {
    /// Total number of store calls of any kind
    pub fn total_calls(&self) -> usize {
        self.gets
            + self.deletes
            + self.lists
            + self.uploads_begun
            + self.parts_uploaded
            + self.uploads_completed
            + self.uploads_aborted
    }
}

#[derive(Debug, Clone)]
struct Entry {
    data: Bytes,
    meta: ObjectMeta,
}

#[derive(Debug)]
struct PendingUpload {
    key: String,
    metadata: HttpMetadata,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Entry>,
    uploads: HashMap<String, PendingUpload>,
    stats: StoreStats,
    fail_part: Option<u32>,
}

/// Process-local object store
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    min_part_size: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store with no minimum part size
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            min_part_size: 0,
        }
    }

    /// Enforce a minimum size for every part except the last
    pub fn with_min_part_size(mut self, min_part_size: u64) -> Self {
        self.min_part_size = min_part_size;
        self
    }

    /// Make the upload of part `part_number` fail in every later session
    pub fn fail_part_upload(&self, part_number: u32) {
        self.lock().fail_part = Some(part_number);
    }

    /// Snapshot of the operation counters
    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    /// Number of multipart sessions neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Whether an object is committed at `key`, without counting a get
    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-operation; the map
        // itself is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn chunked(data: Bytes) -> ByteStream {
    let chunks: Vec<ImgCacheResult<Bytes>> = (0..data.len())
        .step_by(READ_CHUNK_SIZE)
        .map(|start| {
            let end = (start + READ_CHUNK_SIZE).min(data.len());
            Ok(data.slice(start..end))
        })
        .collect();
    stream::iter(chunks).boxed()
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, key: &str) -> ImgCacheResult<Option<StoredObject>> {
        let mut state = self.lock();
        state.stats.gets += 1;

        Ok(state.objects.get(key).map(|entry| StoredObject {
            meta: entry.meta.clone(),
            body: chunked(entry.data.clone()),
        }))
    }

    async fn delete(&self, key: &str) -> ImgCacheResult<()> {
        let mut state = self.lock();
        state.stats.deletes += 1;
        state.objects.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> ImgCacheResult<Vec<String>> {
        let mut state = self.lock();
        state.stats.lists += 1;

        Ok(state
            .objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn begin_multipart(
        &self,
        key: &str,
        metadata: HttpMetadata,
    ) -> ImgCacheResult<Box<dyn MultipartSession>> {
        let upload_id = Uuid::new_v4().to_string();

        let mut state = self.lock();
        state.stats.uploads_begun += 1;
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                metadata,
                parts: BTreeMap::new(),
            },
        );

        Ok(Box::new(InMemoryUpload {
            store: self.clone(),
            key: key.to_string(),
            upload_id,
        }))
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

struct InMemoryUpload {
    store: InMemoryStore,
    key: String,
    upload_id: String,
}

impl InMemoryUpload {
    fn not_found(&self) -> ImgCacheError {
        ImgCacheError::store(
            &self.key,
            format!("multipart upload {} not found", self.upload_id),
        )
    }
}

#[async_trait]
impl MultipartSession for InMemoryUpload {
    fn key(&self) -> &str {
        &self.key
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    async fn upload_part(&mut self, part_number: u32, data: Bytes) -> ImgCacheResult<PartToken> {
        let mut state = self.store.lock();
        state.stats.parts_uploaded += 1;

        if state.fail_part == Some(part_number) {
            return Err(ImgCacheError::store(
                &self.key,
                format!("injected failure on part {part_number}"),
            ));
        }

        let etag = part_etag(&data);
        let upload = state
            .uploads
            .get_mut(&self.upload_id)
            .ok_or_else(|| self.not_found())?;
        upload.parts.insert(part_number, data);

        Ok(PartToken { part_number, etag })
    }

    async fn complete(&mut self, parts: Vec<PartToken>) -> ImgCacheResult<ObjectMeta> {
        let mut state = self.store.lock();

        let upload = state
            .uploads
            .get(&self.upload_id)
            .ok_or_else(|| self.not_found())?;

        let mut sizes = Vec::with_capacity(parts.len());
        for part in &parts {
            let data = upload.parts.get(&part.part_number).ok_or_else(|| {
                ImgCacheError::store(&self.key, format!("part {} missing", part.part_number))
            })?;
            sizes.push(data.len() as u64);
        }
        validate_parts(&self.key, &parts, &sizes, self.store.min_part_size)?;

        let mut buf = Vec::with_capacity(sizes.iter().sum::<u64>() as usize);
        for part in &parts {
            if let Some(data) = upload.parts.get(&part.part_number) {
                buf.extend_from_slice(data);
            }
        }

        let meta = ObjectMeta {
            key: upload.key.clone(),
            size: buf.len() as u64,
            etag: multipart_etag(&parts),
            http: upload.metadata.clone(),
            uploaded_at: Utc::now(),
        };

        state.uploads.remove(&self.upload_id);
        state.objects.insert(
            self.key.clone(),
            Entry {
                data: Bytes::from(buf),
                meta: meta.clone(),
            },
        );
        state.stats.uploads_completed += 1;

        Ok(meta)
    }

    async fn abort(&mut self) -> ImgCacheResult<()> {
        let mut state = self.store.lock();
        state.stats.uploads_aborted += 1;
        state.uploads.remove(&self.upload_id);
        Ok(())
    }
}
