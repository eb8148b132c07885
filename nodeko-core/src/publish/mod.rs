//! Publishing built images.
//!
//! A [`Publisher`] takes a built image and a package name and makes the
//! image available somewhere, returning the references it can now be pulled
//! by. The registry implementation pushes one reference per configured tag
//! under a repository prefix.

use crate::error::Result;
use crate::registry::{parse_reference, RegistryClient};
use crate::types::Image;
use async_trait::async_trait;
use oci_distribution::Reference;
use tracing::info;

/// Maps a package name to the name segment used below the repository.
pub type Namer = fn(&str) -> String;

/// Keep the package name as-is below the repository prefix.
pub fn preserve_package_name(name: &str) -> String {
    name.to_string()
}

/// Makes a built image pullable and reports the resulting references.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, image: &Image, name: &str) -> Result<Vec<String>>;
}

/// Publishes images to a remote registry under a repository prefix.
pub struct RegistryPublisher {
    repo: String,
    namer: Namer,
    tags: Vec<String>,
    client: tokio::sync::Mutex<RegistryClient>,
}

impl RegistryPublisher {
    /// Create a publisher targeting `repo` (e.g. `ghcr.io/myorg`), tagging
    /// images `latest`.
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            namer: preserve_package_name,
            tags: vec!["latest".to_string()],
            client: tokio::sync::Mutex::new(RegistryClient::new()),
        }
    }

    /// Replace the tag list. An empty list keeps the default.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        if !tags.is_empty() {
            self.tags = tags;
        }
        self
    }

    /// Replace the naming function.
    pub fn with_namer(mut self, namer: Namer) -> Self {
        self.namer = namer;
        self
    }

    fn target_reference(&self, name: &str, tag: &str) -> Result<Reference> {
        let repo = self.repo.trim_end_matches('/');
        parse_reference(&format!("{}/{}:{}", repo, (self.namer)(name), tag))
    }
}

#[async_trait]
impl Publisher for RegistryPublisher {
    async fn publish(&self, image: &Image, name: &str) -> Result<Vec<String>> {
        let mut published = Vec::new();
        for tag in &self.tags {
            let reference = self.target_reference(name, tag)?;
            info!("Publishing {}", reference.whole());
            self.client.lock().await.push(image, &reference).await?;
            published.push(reference.whole());
        }
        Ok(published)
    }
}
