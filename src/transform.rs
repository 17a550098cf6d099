//! Transform invoker
//!
//! Sends source bytes and a preset to the external transform service and
//! exposes its output as a byte stream. Pixel processing itself happens in
//! that service.
//!
//! Dropping the returned stream drops the underlying HTTP response, which
//! closes the connection and cancels the transform upstream.

use crate::config::schema::TransformerConfig;
use crate::error::{ImgCacheError, ImgCacheResult};
use crate::origin::SourceAsset;
use crate::preset::Preset;
use crate::store::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderName, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{debug, error};

/// Content-Type sent when the origin did not declare one
const DEFAULT_SOURCE_TYPE: &str = "image/png";

/// Query parameter carrying the url-encoded preset body
const INPUT_PARAM: &str = "input";

/// Result of a transform
pub struct TransformOutput {
    pub content_type: String,
    pub cache_control: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for TransformOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformOutput")
            .field("content_type", &self.content_type)
            .field("cache_control", &self.cache_control)
            .finish_non_exhaustive()
    }
}

/// External image transform capability
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Transform `source` according to `preset`
    ///
    /// A non-success response is `TransformFailed`. Nothing produced by a
    /// failed transform may be cached.
    async fn transform(
        &self,
        asset_path: &str,
        source: SourceAsset,
        preset: &Preset,
    ) -> ImgCacheResult<TransformOutput>;
}

/// Transformer reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransformer {
    client: Client,
    base_url: String,
}

impl HttpTransformer {
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

    /// URL a transform request is posted to
    pub fn request_url(&self, asset_path: &str, preset: &Preset) -> String {
        format!(
            "{}/{}?{}={}",
            self.base_url,
            asset_path.trim_start_matches('/'),
            INPUT_PARAM,
            urlencoding::encode(&preset.canonical_body())
        )
    }
}

#[async_trait]
impl Transformer for HttpTransformer {
    async fn transform(
        &self,
        asset_path: &str,
        source: SourceAsset,
        preset: &Preset,
    ) -> ImgCacheResult<TransformOutput> {
        let url = self.request_url(asset_path, preset);
        let source_type = source
            .content_type
            .unwrap_or_else(|| DEFAULT_SOURCE_TYPE.to_string());

        debug!(path = %asset_path, preset = %preset.name, "invoking transformer");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, source_type)
            .body(Body::wrap_stream(source.body))
            .send()
            .await
            .map_err(|e| ImgCacheError::TransformFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            error!(path = %asset_path, status = %status, "transformer returned an error");
            return Err(ImgCacheError::TransformFailed(format!(
                "transformer responded with {status}"
            )));
        }
        if response.content_length() == Some(0) {
            return Err(ImgCacheError::TransformFailed(
                "transformer returned an empty body".to_string(),
            ));
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE).unwrap_or_else(|| preset.content_type().to_string());
        let cache_control = header(CACHE_CONTROL);

        let body = response
            .bytes_stream()
            .map_err(|e| ImgCacheError::TransformFailed(format!("stream interrupted: {e}")));

        Ok(TransformOutput {
            content_type,
            cache_control,
            body: TrackedStream::new(asset_path, body.boxed()).boxed(),
        })
    }
}

/// Logs when a transform stream is dropped before it was exhausted
struct TrackedStream<S> {
    inner: S,
    path: String,
    finished: bool,
}

impl<S> TrackedStream<S> {
    fn new(path: &str, inner: S) -> Self {
        Self {
            inner,
            path: path.to_string(),
            finished: false,
        }
    }
}

impl<S> Stream for TrackedStream<S>
where
    S: Stream<Item = ImgCacheResult<Bytes>> + Unpin,
{
    type Item = ImgCacheResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = poll {
            self.finished = true;
        }
        poll
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(path = %self.path, "transform stream dropped early, cancelling upstream");
        }
    }
}

/// Create the transformer selected in configuration
pub fn create_transformer(config: &TransformerConfig) -> ImgCacheResult<Arc<dyn Transformer>> {
    Ok(Arc::new(HttpTransformer::new(
        &config.url,
        Duration::from_secs(config.connect_timeout_secs),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset;
    use axum::extract::Query;
    use axum::routing::post;
    use axum::Router;
    use futures_util::stream;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use tokio::sync::Notify;

    /// Serve `app` on an ephemeral local port, returning its base URL
    async fn spawn_fake(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn png_source() -> SourceAsset {
        SourceAsset {
            content_type: Some("image/png".to_string()),
            content_length: Some(7),
            body: stream::iter(vec![Ok(Bytes::from_static(b"PNGDATA"))]).boxed(),
        }
    }

    /// Signals when the response body holding it is dropped
    struct DropSignal(Arc<Notify>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            self.0.notify_one();
        }
    }

    #[test]
    fn request_url_encodes_preset() {
        let transformer =
            HttpTransformer::new("http://127.0.0.1:3000/", Duration::from_secs(1)).unwrap();
        let preset = preset::table().get("thumb60").unwrap();

        let url = transformer.request_url("/img/photo.png", preset);
        let (base, query) = url.split_once('?').unwrap();

        assert_eq!(base, "http://127.0.0.1:3000/img/photo.png");
        let encoded = query.strip_prefix("input=").unwrap();
        assert!(!encoded.contains('{'));
        assert_eq!(
            urlencoding::decode(encoded).unwrap(),
            preset.canonical_body()
        );
    }

    #[tokio::test]
    async fn tracked_stream_passes_items_through() {
        let inner = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);
        let tracked = TrackedStream::new("a.png", inner);
        let chunks: Vec<Bytes> = tracked.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"abcd");
    }

    #[tokio::test]
    async fn unreachable_transformer_fails() {
        // Port 9 (discard) is not expected to accept HTTP connections
        let transformer =
            HttpTransformer::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let source = SourceAsset {
            content_type: None,
            content_length: Some(1),
            body: stream::iter(vec![Ok(Bytes::from_static(b"x"))]).boxed(),
        };
        let preset = preset::table().get("webp").unwrap();

        let err = transformer.transform("a.png", source, preset).await.unwrap_err();
        assert!(matches!(err, ImgCacheError::TransformFailed(_)));
    }

    #[tokio::test]
    async fn transformer_receives_preset_and_source() {
        let app = Router::new().route(
            "/{*path}",
            post(
                |Query(params): Query<HashMap<String, String>>,
                 headers: axum::http::HeaderMap,
                 body: Bytes| async move {
                    let input = params.get("input").cloned().unwrap_or_default();
                    let source_type = headers
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    (
                        [
                            (CONTENT_TYPE, "image/webp".to_string()),
                            (CACHE_CONTROL, "max-age=60".to_string()),
                        ],
                        format!("{input}|{source_type}|{}", body.len()),
                    )
                },
            ),
        );
        let base = spawn_fake(app).await;
        let transformer = HttpTransformer::new(&base, Duration::from_secs(1)).unwrap();
        let preset = preset::table().get("thumb60").unwrap();

        let output = transformer.transform("img/a.png", png_source(), preset).await.unwrap();
        assert_eq!(output.content_type, "image/webp");
        assert_eq!(output.cache_control.as_deref(), Some("max-age=60"));

        let chunks: Vec<Bytes> = output.body.try_collect().await.unwrap();
        let echoed = String::from_utf8(chunks.concat()).unwrap();
        assert_eq!(echoed, format!("{}|image/png|7", preset.canonical_body()));
    }

    #[tokio::test]
    async fn server_error_is_transform_failure() {
        let app = Router::new().route(
            "/{*path}",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = spawn_fake(app).await;
        let transformer = HttpTransformer::new(&base, Duration::from_secs(1)).unwrap();
        let preset = preset::table().get("webp").unwrap();

        let err = transformer.transform("a.png", png_source(), preset).await.unwrap_err();
        assert!(matches!(err, ImgCacheError::TransformFailed(ref msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn dropping_output_closes_transformer_connection() {
        let closed = Arc::new(Notify::new());
        let app = Router::new().route(
            "/{*path}",
            post({
                let closed = Arc::clone(&closed);
                move || {
                    let signal = DropSignal(Arc::clone(&closed));
                    async move {
                        // Endless slow output; only a client disconnect ends it
                        let chunks = stream::unfold(signal, |signal| async move {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            Some((Ok::<_, Infallible>(Bytes::from_static(b"chunk")), signal))
                        });
                        axum::body::Body::from_stream(chunks)
                    }
                }
            }),
        );
        let base = spawn_fake(app).await;
        let transformer = HttpTransformer::new(&base, Duration::from_secs(1)).unwrap();
        let preset = preset::table().get("webp").unwrap();

        let mut output = transformer.transform("a.png", png_source(), preset).await.unwrap();
        let first = output.body.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(output);

        tokio::time::timeout(Duration::from_secs(5), closed.notified())
            .await
            .expect("transformer kept streaming after the output was dropped");
    }
}
