//! Integration tests for imgcache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use bytes::Bytes;
    use imgcache::store::{HttpMetadata, LocalStore, ObjectStore};
    use predicates::prelude::*;
    use tempfile::TempDir;

    /// Binary pointed at a config file inside `dir`
    fn imgcache(dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("imgcache");
        cmd.env("IMGCACHE_CONFIG", dir.path().join("config.toml"))
            .env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Edge cache for preset-transformed images"));
    }

    #[test]
    fn version_displays() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("imgcache"));
    }

    #[test]
    fn presets_table() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .arg("presets")
            .assert()
            .success()
            .stdout(predicate::str::contains("thumb160"))
            .stdout(predicate::str::contains("160x160 contain"));
    }

    #[test]
    fn presets_plain_sorted() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .args(["presets", "--format", "plain"])
            .assert()
            .success()
            .stdout("2k\nthumb160\nthumb400\nthumb60\nwebp\n");
    }

    #[test]
    fn presets_json() {
        let dir = TempDir::new().unwrap();
        let output = imgcache(&dir)
            .args(["presets", "--format", "json"])
            .output()
            .unwrap();
        assert!(output.status.success());

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        let entries = parsed.as_array().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0]["name"], "2k");
        assert_eq!(entries[0]["body"]["transform"]["width"], 2000);
        assert_eq!(entries[0]["digest"].as_str().unwrap().len(), 32);
    }

    #[test]
    fn key_output() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .args(["key", "img/photo.png", "thumb60"])
            .assert()
            .success()
            .stdout(predicate::str::is_match(r"^cached/assets/img/photo\.png/thumb60/[0-9a-f]{32}\n$").unwrap());
    }

    #[test]
    fn key_unknown_preset() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .args(["key", "photo.png", "huge"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid preset"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("[transformer]"));
    }

    #[test]
    fn config_init_then_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        imgcache(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(dir.path().join("config.toml").exists());

        imgcache(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "[store]\nbackend = \"tape\"\n").unwrap();

        imgcache(&dir)
            .arg("presets")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("imgcache config init --force"));
    }

    #[tokio::test]
    async fn clear_cache_removes_cached_objects() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let store = LocalStore::new(root.clone());
        let key = "cached/assets/a.png/webp/00ff";

        let mut session = store
            .begin_multipart(key, HttpMetadata::default())
            .await
            .unwrap();
        let part = session
            .upload_part(1, Bytes::from_static(b"webp"))
            .await
            .unwrap();
        session.complete(vec![part]).await.unwrap();

        let config = format!(
            "[general]\naudit_log = false\n\n[store]\nroot = {:?}\n",
            root.display().to_string()
        );
        std::fs::write(dir.path().join("config.toml"), config).unwrap();

        imgcache(&dir)
            .arg("clear-cache")
            .assert()
            .success()
            .stdout(predicate::str::contains("Cleared 1 cached object(s)"));
        assert!(store.get(key).await.unwrap().is_none());
    }
}

mod gateway_tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::{stream, StreamExt, TryStreamExt};
    use imgcache::cache::CACHE_PREFIX;
    use imgcache::origin::{AssetSource, SourceAsset};
    use imgcache::preset::Preset;
    use imgcache::store::{InMemoryStore, LocalStore, ObjectStore};
    use imgcache::transform::{TransformOutput, Transformer};
    use imgcache::{AssetResponse, CacheGateway, CacheStatus, ImgCacheError, ImgCacheResult};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const SOURCE: &[u8] = b"\x89PNG source image";

    #[derive(Default)]
    struct Origin {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl AssetSource for Origin {
        async fn fetch(&self, path: &str) -> ImgCacheResult<SourceAsset> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if path != "photo.png" {
                return Err(ImgCacheError::AssetNotFound(path.to_string()));
            }
            Ok(SourceAsset {
                content_type: Some("image/png".to_string()),
                content_length: Some(SOURCE.len() as u64),
                body: stream::iter(vec![Ok(Bytes::from_static(SOURCE))]).boxed(),
            })
        }

        fn source_name(&self) -> &'static str {
            "test"
        }
    }

    /// Records every preset body it is asked for and emits `size` bytes
    struct Resizer {
        bodies: Mutex<Vec<String>>,
        size: usize,
    }

    impl Resizer {
        fn new(size: usize) -> Self {
            Self {
                bodies: Mutex::new(Vec::new()),
                size,
            }
        }

        fn calls(&self) -> usize {
            self.bodies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transformer for Resizer {
        async fn transform(
            &self,
            _asset_path: &str,
            source: SourceAsset,
            preset: &Preset,
        ) -> ImgCacheResult<TransformOutput> {
            let _: Vec<Bytes> = source.body.try_collect().await?;
            self.bodies.lock().unwrap().push(preset.canonical_body());

            let data: Vec<u8> = (0..self.size).map(|i| (i % 256) as u8).collect();
            let chunks: Vec<ImgCacheResult<Bytes>> = data
                .chunks(7)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();

            Ok(TransformOutput {
                content_type: preset.content_type().to_string(),
                cache_control: Some("public, max-age=60".to_string()),
                body: stream::iter(chunks).boxed(),
            })
        }
    }

    struct Harness {
        store: InMemoryStore,
        origin: Arc<Origin>,
        resizer: Arc<Resizer>,
        gateway: CacheGateway,
    }

    fn harness(output_size: usize) -> Harness {
        let store = InMemoryStore::new().with_min_part_size(32);
        let origin = Arc::new(Origin::default());
        let resizer = Arc::new(Resizer::new(output_size));
        let gateway = CacheGateway::new(Arc::new(store.clone()), origin.clone(), resizer.clone())
            .with_part_size(32);
        Harness {
            store,
            origin,
            resizer,
            gateway,
        }
    }

    fn preset(name: &str) -> HashMap<String, String> {
        HashMap::from([("p".to_string(), name.to_string())])
    }

    async fn read(response: AssetResponse) -> Vec<u8> {
        let chunks: Vec<Bytes> = response.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn scenario_a_first_request_fills_cache() {
        let h = harness(100);

        let response = h
            .gateway
            .serve_asset("photo.png", &preset("thumb160"))
            .await
            .unwrap();

        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(response.content_type, "image/webp");
        assert_eq!(response.content_length, Some(100));
        assert_eq!(response.cache_control.as_deref(), Some("public, max-age=60"));
        assert_eq!(read(response).await.len(), 100);

        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            *h.resizer.bodies.lock().unwrap(),
            [r#"{"output":{"format":"image/webp","quality":85},"transform":{"fit":"contain","height":160,"width":160}}"#]
        );
        let stats = h.store.stats();
        assert_eq!(stats.uploads_begun, 1);
        assert_eq!(stats.uploads_completed, 1);
        assert_eq!(stats.parts_uploaded, 3);
    }

    #[tokio::test]
    async fn scenario_b_repeat_is_a_hit() {
        let h = harness(100);

        let first = h
            .gateway
            .serve_asset("photo.png", &preset("thumb160"))
            .await
            .unwrap();
        let first_body = read(first).await;

        let second = h
            .gateway
            .serve_asset("photo.png", &preset("thumb160"))
            .await
            .unwrap();

        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(read(second).await, first_body);
        assert_eq!(h.resizer.calls(), 1);
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scenario_c_unknown_preset() {
        let h = harness(100);

        let err = h
            .gateway
            .serve_asset("photo.png", &preset("bogus"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImgCacheError::InvalidPreset(ref name) if name == "bogus"));
        assert_eq!(h.store.stats().total_calls(), 0);
        assert_eq!(h.resizer.calls(), 0);
    }

    #[tokio::test]
    async fn scenario_d_clear_then_refill() {
        let h = harness(40);
        h.gateway
            .serve_asset("photo.png", &preset("thumb160"))
            .await
            .unwrap();

        assert_eq!(h.gateway.clear_cache().await.unwrap(), 1);

        let response = h
            .gateway
            .serve_asset("photo.png", &preset("thumb160"))
            .await
            .unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(h.resizer.calls(), 2);
        assert_eq!(h.origin.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn passthrough_makes_no_store_calls() {
        let h = harness(100);

        let response = h
            .gateway
            .serve_asset("photo.png", &HashMap::new())
            .await
            .unwrap();

        assert_eq!(response.status, CacheStatus::Passthrough);
        assert_eq!(read(response).await, SOURCE);
        assert_eq!(h.store.stats().total_calls(), 0);
        assert_eq!(h.resizer.calls(), 0);
    }

    #[tokio::test]
    async fn injected_part_failure_aborts_once() {
        let h = harness(100);
        h.store.fail_part_upload(2);

        let err = h
            .gateway
            .serve_asset("photo.png", &preset("thumb400"))
            .await
            .unwrap_err();

        assert!(matches!(err, ImgCacheError::Store { .. }));
        let stats = h.store.stats();
        assert_eq!(stats.uploads_aborted, 1);
        assert_eq!(stats.uploads_completed, 0);
        assert_eq!(h.store.open_uploads(), 0);
        assert!(h.store.list(CACHE_PREFIX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_store_survives_restart() {
        let dir = TempDir::new().unwrap();
        let store = || LocalStore::new(dir.path().to_path_buf()).with_min_part_size(32);
        let origin = Arc::new(Origin::default());
        let resizer = Arc::new(Resizer::new(75));

        let first = CacheGateway::new(Arc::new(store()), origin.clone(), resizer.clone())
            .with_part_size(32);
        let response = first
            .serve_asset("photo.png", &preset("thumb60"))
            .await
            .unwrap();
        assert_eq!(response.status, CacheStatus::Miss);
        assert_eq!(response.content_length, Some(75));
        let filled = read(response).await;
        drop(first);

        let second = CacheGateway::new(Arc::new(store()), origin.clone(), resizer.clone())
            .with_part_size(32);
        let response = second
            .serve_asset("photo.png", &preset("thumb60"))
            .await
            .unwrap();

        assert_eq!(response.status, CacheStatus::Hit);
        assert_eq!(read(response).await, filled);
        assert_eq!(resizer.calls(), 1);
        assert!(!dir.path().join("uploads").read_dir().unwrap().any(|_| true));
    }
}
