//! OCI registry access for NODEKO.
//!
//! This module handles resolving and pulling base images, and pushing the
//! assembled images back out, via the OCI Distribution API.

use crate::build::node::read_manifest;
use crate::build::BaseResolver;
use crate::error::{NodekoError, Result};
use crate::types::{ConfigFile, Image, LayerBlob};
use async_trait::async_trait;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::{ImageIndexEntry, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Registry client for pulling base images and pushing built images.
pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryClient {
    /// Create a client with default configuration: HTTPS everywhere except
    /// localhost, Linux platform selection, credentials from the
    /// environment.
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["localhost".to_string()]),
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };

        Self { client: Client::new(config), auth: auth_from_env() }
    }

    /// Pull an image and parse its config file.
    #[instrument(skip(self), fields(image = %reference.whole()))]
    pub async fn pull(&mut self, reference: &Reference) -> Result<Image> {
        info!("Pulling image from registry");

        let image_data = self
            .client
            .pull(
                reference,
                &self.auth,
                vec![
                    oci_distribution::manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
                    oci_distribution::manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE,
                ],
            )
            .await
            .map_err(|e| NodekoError::PullFailed {
                image: reference.whole(),
                reason: e.to_string(),
            })?;

        let config: ConfigFile =
            serde_json::from_slice(&image_data.config.data).map_err(|e| {
                NodekoError::InvalidImageConfig {
                    reason: format!("failed to parse config of {}: {}", reference.whole(), e),
                }
            })?;

        info!(layers = image_data.layers.len(), "Image fetched");

        Ok(Image {
            layers: image_data
                .layers
                .into_iter()
                .map(|layer| LayerBlob { media_type: layer.media_type, data: layer.data })
                .collect(),
            config,
            config_media_type: image_data.config.media_type,
            digest: image_data.digest,
        })
    }

    /// Push an image to `reference`. Returns the manifest URL the registry
    /// reports.
    #[instrument(skip(self, image), fields(image = %reference.whole()))]
    pub async fn push(&mut self, image: &Image, reference: &Reference) -> Result<String> {
        let layers: Vec<ImageLayer> = image
            .layers
            .iter()
            .map(|layer| ImageLayer::new(layer.data.clone(), layer.media_type.clone(), None))
            .collect();
        let config = Config::new(image.config_blob()?, image.config_media_type.clone(), None);
        let manifest = OciImageManifest::build(&layers, &config, None);

        debug!(layers = layers.len(), "Pushing image");
        let response = self
            .client
            .push(reference, &layers, config, &self.auth, Some(manifest))
            .await
            .map_err(|e| NodekoError::PushFailed {
                image: reference.whole(),
                reason: e.to_string(),
            })?;

        info!(manifest = %response.manifest_url, "Image pushed");
        Ok(response.manifest_url)
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves base images from a registry, honoring per-unit overrides.
///
/// The default reference is an explicit constructor argument, so several
/// configurations can coexist in one process and tests can inject their
/// own.
pub struct RegistryResolver {
    default_base: Reference,
    client: tokio::sync::Mutex<RegistryClient>,
}

impl RegistryResolver {
    /// Create a resolver that falls back to `default_base` for units without
    /// an override.
    pub fn new(default_base: Reference) -> Self {
        Self { default_base, client: tokio::sync::Mutex::new(RegistryClient::new()) }
    }

    /// The reference a source unit's base will be pulled from: the
    /// manifest's `nodeko.defaultBaseImage` when present and parseable,
    /// otherwise the configured default. A malformed override is logged and
    /// ignored.
    pub fn base_reference_for(&self, base_dir: &Path, path: &str) -> Reference {
        if let Some(manifest) = read_manifest(base_dir, path) {
            let override_ref = manifest.nodeko.default_base_image;
            if !override_ref.is_empty() {
                match parse_reference(&override_ref) {
                    Ok(reference) => return reference,
                    Err(e) => {
                        warn!("ignoring base image override {:?}: {}", override_ref, e);
                    }
                }
            }
        }
        self.default_base.clone()
    }
}

#[async_trait]
impl BaseResolver for RegistryResolver {
    async fn resolve(&self, base_dir: &Path, path: &str) -> Result<Image> {
        let reference = self.base_reference_for(base_dir, path);
        info!("Using base {} for {}", reference.whole(), path);
        self.client.lock().await.pull(&reference).await
    }
}

/// Parse an image reference string into an OCI [`Reference`].
///
/// Handles:
/// - Short names: "node" → "docker.io/library/node:latest"
/// - Tagged names: "node:lts-slim" → "docker.io/library/node:lts-slim"
/// - Fully qualified: "ghcr.io/org/repo:tag"
pub fn parse_reference(image: &str) -> Result<Reference> {
    // If no registry specified, assume Docker Hub
    let normalized = if !image.contains('/') {
        format!("docker.io/library/{}", image)
    } else if !image.starts_with("docker.io/")
        && !image.starts_with("ghcr.io/")
        && !image.starts_with("gcr.io/")
        && !image.starts_with("quay.io/")
        && !image.starts_with("localhost/")
    {
        // Assume Docker Hub for user/repo format
        if image.split('/').count() == 2 {
            format!("docker.io/{}", image)
        } else {
            image.to_string()
        }
    } else {
        image.to_string()
    };

    // Add :latest if no tag specified
    let normalized = if !normalized.contains(':') && !normalized.contains('@') {
        format!("{}:latest", normalized)
    } else {
        normalized
    };

    Reference::try_from(normalized.as_str()).map_err(|e| NodekoError::InvalidImageRef {
        image: image.to_string(),
        reason: e.to_string(),
    })
}

/// Basic credentials from the environment, anonymous otherwise.
fn auth_from_env() -> RegistryAuth {
    match (
        std::env::var("NODEKO_REGISTRY_USERNAME"),
        std::env::var("NODEKO_REGISTRY_PASSWORD"),
    ) {
        (Ok(username), Ok(password)) => RegistryAuth::Basic(username, password),
        _ => RegistryAuth::Anonymous,
    }
}

/// Platform resolver that always selects Linux images with the current
/// architecture. Published images run in Linux containers even when the
/// build host is something else.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    debug!("Looking for linux/{} image variant", arch);

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|platform| platform.os == "linux" && platform.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
