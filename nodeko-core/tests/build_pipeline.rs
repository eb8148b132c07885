//! Integration tests for the build pipeline.
//!
//! These tests drive the public surface end to end:
//! - classify a source unit
//! - build it into an image through the caching layer
//! - inspect the resulting layers and configuration
//!
//! Tests use a stub base-image resolver for portability; no registry access.

use flate2::read::GzDecoder;
use nodeko_core::{
    build::LAYER_MEDIA_TYPE,
    error::Result,
    types::{ConfigFile, ContainerConfig, History, Image, LayerBlob, RootFs},
    BaseResolver, Builder, Caching, NodeBuild, NodekoError,
};
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Stub resolver handing out a fixed base image (no registry access).
struct StubResolver {
    base: Image,
    calls: AtomicUsize,
}

impl StubResolver {
    fn new() -> Self {
        Self { base: base_image(), calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BaseResolver for StubResolver {
    async fn resolve(&self, _base_dir: &Path, _path: &str) -> Result<Image> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.base.clone())
    }
}

fn base_image() -> Image {
    Image {
        layers: vec![LayerBlob { media_type: LAYER_MEDIA_TYPE.to_string(), data: vec![0u8; 16] }],
        config: ConfigFile {
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            config: ContainerConfig {
                env: Some(vec!["NODE_VERSION=20.0.0".to_string()]),
                ..Default::default()
            },
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: vec!["sha256:base".to_string()],
            },
            history: vec![History { created_by: Some("base".to_string()), ..Default::default() }],
            ..Default::default()
        },
        config_media_type: "application/vnd.docker.container.image.v1+json".to_string(),
        digest: Some("sha256:basedigest".to_string()),
    }
}

/// Lay out a realistic source unit under a temp dir.
fn source_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let app = dir.path().join("web");
    std::fs::create_dir_all(app.join("lib")).unwrap();
    std::fs::create_dir_all(app.join("kodata")).unwrap();
    std::fs::write(app.join("package.json"), r#"{"name": "web"}"#).unwrap();
    std::fs::write(app.join("main.js"), "require('./lib/server')").unwrap();
    std::fs::write(app.join("lib/server.js"), "module.exports = () => {}").unwrap();
    std::fs::write(app.join("kodata/index.html"), "<h1>hi</h1>").unwrap();
    dir
}

fn layer_entries(blob: &LayerBlob) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(&blob.data[..]));
    archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn layer_file_content(blob: &LayerBlob, name: &str) -> String {
    let mut archive = tar::Archive::new(GzDecoder::new(&blob.data[..]));
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        if entry.path().unwrap().to_string_lossy() == name {
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            return content;
        }
    }
    panic!("entry {} not found", name);
}

fn pipeline(resolver: Arc<StubResolver>) -> Caching {
    let builder = Arc::new(NodeBuild::new(resolver));
    Caching::new(builder as Arc<dyn Builder>)
}

#[tokio::test]
async fn test_classify_then_build_then_inspect() {
    let tree = source_tree();
    let resolver = Arc::new(StubResolver::new());
    let cache = pipeline(Arc::clone(&resolver));

    let name = cache.is_supported_reference(tree.path(), "web").unwrap();
    assert_eq!(name, "web");

    let image = cache.build(tree.path(), "web").await.unwrap();

    // Base layer plus the app and data layers.
    assert_eq!(image.layers.len(), 3);
    assert_eq!(image.config.rootfs.diff_ids.len(), 3);
    assert_eq!(resolver.calls(), 1);

    // App layer: root chain first, then the tree in lexical order, with
    // nested directories implied by the file paths.
    let app_entries = layer_entries(&image.layers[1]);
    assert_eq!(
        app_entries,
        vec!["ko-app", "ko-app/kodata/index.html", "ko-app/lib/server.js", "ko-app/main.js", "ko-app/package.json"]
    );
    assert_eq!(
        layer_file_content(&image.layers[1], "ko-app/main.js"),
        "require('./lib/server')"
    );

    // Data layer: ancestor chain precedes the root and its files.
    let data_entries = layer_entries(&image.layers[2]);
    assert_eq!(data_entries, vec!["var", "var/run", "var/run/ko", "var/run/ko/index.html"]);

    // Run configuration rewritten for the app.
    let config = &image.config.config;
    assert_eq!(
        config.entrypoint.as_ref().unwrap(),
        &vec!["node".to_string(), "/ko-app/main.js".to_string()]
    );
    assert_eq!(config.working_dir.as_deref(), Some("/ko-app"));
    assert!(config.env.as_ref().unwrap().contains(&"NODEKO_DATA_PATH=/var/run/ko".to_string()));
    assert_eq!(image.config.author.as_deref(), Some("github.com/nodeko/nodeko"));
}

#[tokio::test]
async fn test_cache_serves_repeat_builds_without_resolving_again() {
    let tree = source_tree();
    let resolver = Arc::new(StubResolver::new());
    let cache = pipeline(Arc::clone(&resolver));

    let first = cache.build(tree.path(), "web").await.unwrap();
    let second = cache.build(tree.path(), "web").await.unwrap();

    assert_eq!(resolver.calls(), 1);
    assert_eq!(first.config.rootfs.diff_ids, second.config.rootfs.diff_ids);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_builds_resolve_the_base_once() {
    let tree = source_tree();
    let resolver = Arc::new(StubResolver::new());
    let cache = Arc::new(pipeline(Arc::clone(&resolver)));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let base = tree.path().to_path_buf();
        handles.push(tokio::spawn(async move { cache.build(&base, "web").await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_missing_directory_error_is_cached_without_rework() {
    let tree = TempDir::new().unwrap();
    let resolver = Arc::new(StubResolver::new());
    let cache = pipeline(Arc::clone(&resolver));

    let first = cache.build(tree.path(), "missing-dir").await.unwrap_err();
    assert!(matches!(first, NodekoError::IoError { .. } | NodekoError::Shared(_)));

    let second = cache.build(tree.path(), "missing-dir").await.unwrap_err();
    assert_eq!(first.to_string(), second.to_string());

    // The walk failed before base resolution, and the cached error spared
    // the second call from re-attempting anything.
    assert_eq!(resolver.calls(), 0);
}

#[tokio::test]
async fn test_invalidate_forces_a_fresh_resolution() {
    let tree = source_tree();
    let resolver = Arc::new(StubResolver::new());
    let cache = pipeline(Arc::clone(&resolver));

    cache.build(tree.path(), "web").await.unwrap();
    cache.invalidate(tree.path(), "web");
    cache.build(tree.path(), "web").await.unwrap();

    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn test_identical_trees_build_identical_layers() {
    let tree = source_tree();
    let resolver = Arc::new(StubResolver::new());

    let first = pipeline(Arc::clone(&resolver)).build(tree.path(), "web").await.unwrap();
    let second = pipeline(Arc::clone(&resolver)).build(tree.path(), "web").await.unwrap();

    assert_eq!(first.layers[1].data, second.layers[1].data);
    assert_eq!(first.layers[2].data, second.layers[2].data);
    assert_eq!(first.config.rootfs.diff_ids, second.config.rootfs.diff_ids);
}

#[tokio::test]
async fn test_failed_unit_does_not_affect_other_units() {
    let tree = source_tree();
    let resolver = Arc::new(StubResolver::new());
    let cache = pipeline(Arc::clone(&resolver));

    cache.build(tree.path(), "missing-dir").await.unwrap_err();
    let image = cache.build(tree.path(), "web").await.unwrap();
    assert_eq!(image.layers.len(), 3);
}
