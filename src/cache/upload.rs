//! Chunked multipart upload of length-unknown streams
//!
//! The transformer does not announce the size of its output, and the store
//! only accepts either a known length or a multipart upload. This module
//! accumulates the stream into parts of at least `part_size` bytes and drives
//! the store's multipart protocol, holding at most one part in memory.

use crate::error::{ImgCacheError, ImgCacheResult};
use crate::store::{ByteStream, HttpMetadata, MultipartSession, ObjectMeta, ObjectStore, PartToken};
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tracing::{debug, warn};

/// Default part size, the minimum accepted by S3-compatible stores
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Owns an open multipart session until it is completed or aborted
///
/// `complete` and `abort` consume the guard, so a session is released
/// exactly once. A guard dropped while still holding its session (a panic
/// or a cancelled task) schedules an abort on the current runtime.
pub struct UploadGuard {
    session: Option<Box<dyn MultipartSession>>,
    key: String,
}

impl UploadGuard {
    /// Take ownership of an open session
    pub fn new(session: Box<dyn MultipartSession>) -> Self {
        Self {
            key: session.key().to_string(),
            session: Some(session),
        }
    }

    /// Key the session commits to
    pub fn key(&self) -> &str {
        &self.key
    }

    fn session(&mut self) -> ImgCacheResult<&mut Box<dyn MultipartSession>> {
        self.session.as_mut().ok_or_else(|| {
            ImgCacheError::Internal(format!("upload session for {} already released", self.key))
        })
    }

    /// Upload one part
    pub async fn upload_part(&mut self, part_number: u32, data: Bytes) -> ImgCacheResult<PartToken> {
        self.session()?.upload_part(part_number, data).await
    }

    /// Commit the session; a failed commit is aborted before returning
    pub async fn complete(mut self, parts: Vec<PartToken>) -> ImgCacheResult<ObjectMeta> {
        let result = match self.session() {
            Ok(session) => session.complete(parts).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(meta) => {
                self.session.take();
                Ok(meta)
            }
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    /// Abort the session, releasing all partial state
    ///
    /// Abort failures are logged rather than returned: the caller is always
    /// already propagating the error that caused the abort.
    pub async fn abort(mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(key = %self.key, upload_id = %session.upload_id(), "aborting multipart upload");
            if let Err(e) = session.abort().await {
                warn!(key = %self.key, "failed to abort multipart upload: {}", e);
            }
        }
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        warn!(key = %self.key, "multipart upload dropped while open, aborting");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.abort().await {
                        warn!(key = %session.key(), "failed to abort multipart upload: {}", e);
                    }
                });
            }
            Err(_) => warn!(key = %self.key, "no runtime available to abort upload"),
        }
    }
}

/// Upload `body` to `key` in parts of at least `part_size` bytes
///
/// Parts are numbered from 1. Bytes left at end of stream become the final
/// part regardless of size; an empty stream is uploaded as a single empty
/// part. Any read, upload or commit error aborts the session before it is
/// returned.
pub async fn upload_stream(
    store: &dyn ObjectStore,
    key: &str,
    metadata: HttpMetadata,
    mut body: ByteStream,
    part_size: usize,
) -> ImgCacheResult<ObjectMeta> {
    let part_size = part_size.max(1);
    let mut guard = UploadGuard::new(store.begin_multipart(key, metadata).await?);
    let mut buffer = BytesMut::with_capacity(part_size);
    let mut parts = Vec::new();

    loop {
        let chunk = match body.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                guard.abort().await;
                return Err(e);
            }
            None => break,
        };

        buffer.extend_from_slice(&chunk);
        if buffer.len() >= part_size {
            let part_number = parts.len() as u32 + 1;
            let data = buffer.split().freeze();
            match guard.upload_part(part_number, data).await {
                Ok(token) => parts.push(token),
                Err(e) => {
                    guard.abort().await;
                    return Err(e);
                }
            }
        }
    }

    if !buffer.is_empty() || parts.is_empty() {
        let part_number = parts.len() as u32 + 1;
        match guard.upload_part(part_number, buffer.freeze()).await {
            Ok(token) => parts.push(token),
            Err(e) => {
                guard.abort().await;
                return Err(e);
            }
        }
    }

    debug!(key = %key, parts = parts.len(), "committing multipart upload");
    guard.complete(parts).await
}
