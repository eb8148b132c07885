//! Image building for NODEKO.
//!
//! This module provides deterministic layer archiving, Node.js image
//! assembly, and build-result caching.

use crate::error::Result;
use crate::types::Image;
use async_trait::async_trait;
use std::path::Path;

pub mod archive;
pub mod cache;
pub mod node;

pub use archive::{archive_dir, archive_empty, LayerTarball, LAYER_MEDIA_TYPE};
pub use cache::{Caching, Future};
pub use node::{
    read_manifest, BaseResolver, NodeBuild, PackageManifest, PackageOptions, APP_DIR,
    KODATA_ROOT, MANIFEST_FILENAME,
};

/// The build contract.
///
/// Implemented by [`NodeBuild`] and by the [`Caching`] decorator, so callers
/// can hold either behind the same interface.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Classify a source unit: `Some(canonical name)` when the directory
    /// holds a buildable application, `None` otherwise. Never an error and
    /// never has side effects beyond reading the manifest.
    fn is_supported_reference(&self, base_dir: &Path, path: &str) -> Option<String>;

    /// Build a container image for the source unit. All-or-nothing: any
    /// failure aborts the build and no partial image is returned.
    async fn build(&self, base_dir: &Path, path: &str) -> Result<Image>;
}
