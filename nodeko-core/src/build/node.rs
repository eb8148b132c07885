//! Node.js image assembly.
//!
//! `NodeBuild` turns one source directory into a runnable container image:
//! two deterministic layers (application code, static data) appended onto a
//! resolved base image, with the run configuration rewritten to start the
//! application.

use crate::build::archive::{self, LayerTarball};
use crate::build::Builder;
use crate::error::Result;
use crate::types::{History, Image, Layer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Where the application code lives in the image.
pub const APP_DIR: &str = "/ko-app";

/// Where static data lives in the image.
pub const KODATA_ROOT: &str = "/var/run/ko";

/// Conventional static-data directory at the root of a source unit.
const KODATA_DIR: &str = "kodata";

/// Manifest file identifying a buildable source unit.
pub const MANIFEST_FILENAME: &str = "package.json";

/// Environment variable advertising the static-data path to the app.
const DATA_PATH_ENV: &str = "NODEKO_DATA_PATH";

const DEFAULT_APP_FILENAME: &str = "main.js";
const LAYER_AUTHOR: &str = "nodeko";
const IMAGE_AUTHOR: &str = "github.com/nodeko/nodeko";

/// The portion of `package.json` NODEKO cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageManifest {
    /// Package name; a unit without one is not buildable.
    #[serde(default)]
    pub name: String,

    /// Tool-specific options.
    #[serde(default)]
    pub nodeko: PackageOptions,
}

/// NODEKO options embedded in a package manifest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageOptions {
    /// Overrides the configured default base image for this unit.
    #[serde(default, rename = "defaultBaseImage")]
    pub default_base_image: String,
}

/// Read and parse a source unit's manifest. Any failure (missing file,
/// unreadable, invalid JSON) is a negative classification, not an error.
pub fn read_manifest(base_dir: &Path, path: &str) -> Option<PackageManifest> {
    let manifest_path = base_dir.join(path).join(MANIFEST_FILENAME);
    let raw = fs::read(&manifest_path).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Supplies the base image a build starts from, keyed by source unit.
#[async_trait]
pub trait BaseResolver: Send + Sync {
    async fn resolve(&self, base_dir: &Path, path: &str) -> Result<Image>;
}

/// Builds container images for Node.js source directories.
pub struct NodeBuild {
    base_resolver: Arc<dyn BaseResolver>,
    creation_time: Option<DateTime<Utc>>,
}

impl NodeBuild {
    /// Create a builder resolving base images through `base_resolver`.
    pub fn new(base_resolver: Arc<dyn BaseResolver>) -> Self {
        Self { base_resolver, creation_time: None }
    }

    /// Fix the resulting image's creation timestamp, for byte-reproducible
    /// builds. `None` leaves the base image's timestamp untouched.
    pub fn with_creation_time(mut self, creation_time: Option<DateTime<Utc>>) -> Self {
        self.creation_time = creation_time;
        self
    }
}

// For now assume main.js.
// TODO: read the entry point from the package manifest's "main" field.
fn app_filename(_path: &str) -> &'static str {
    DEFAULT_APP_FILENAME
}

fn layer_history(path: &str, created: DateTime<Utc>) -> History {
    History {
        created: Some(created),
        author: Some(LAYER_AUTHOR.to_string()),
        created_by: Some(format!("nodeko publish {}", path)),
        ..Default::default()
    }
}

#[async_trait]
impl Builder for NodeBuild {
    fn is_supported_reference(&self, base_dir: &Path, path: &str) -> Option<String> {
        let manifest = read_manifest(base_dir, path)?;
        if manifest.name.is_empty() {
            return None;
        }
        Some(manifest.name)
    }

    async fn build(&self, base_dir: &Path, path: &str) -> Result<Image> {
        let source = base_dir.join(path);
        let app_path = format!("{}/{}", APP_DIR, app_filename(path));

        debug!(source = %source.display(), "Archiving application layer");
        let app_tar = archive::archive_dir(&source, APP_DIR)?;

        let kodata = source.join(KODATA_DIR);
        debug!(source = %kodata.display(), "Archiving data layer");
        let data_tar = if kodata.exists() {
            archive::archive_dir(&kodata, KODATA_ROOT)?
        } else {
            // No static data; the layer still carries the mount point.
            archive::archive_empty(KODATA_ROOT)?
        };

        let mut image = self.base_resolver.resolve(base_dir, path).await?;

        let now = Utc::now();
        image.append_layer(as_layer(app_tar, layer_history(path, now)));
        image.append_layer(as_layer(data_tar, layer_history(path, now)));

        // The resolver hands us an owned copy of the base image, so the
        // rewrite below can never reach an object another build sees.
        let config = &mut image.config;
        config.config.entrypoint = Some(vec!["node".to_string(), app_path]);
        config.config.working_dir = Some(APP_DIR.to_string());
        config
            .config
            .env
            .get_or_insert_with(Vec::new)
            .push(format!("{}={}", DATA_PATH_ENV, KODATA_ROOT));
        config.container_config = Some(config.config.clone());
        config.author = Some(IMAGE_AUTHOR.to_string());

        if let Some(creation_time) = self.creation_time {
            config.created = Some(creation_time);
        }

        Ok(image)
    }
}

fn as_layer(tarball: LayerTarball, history: History) -> Layer {
    let diff_id = tarball.diff_id.clone();
    Layer { blob: tarball.into_blob(), diff_id, history }
}
