//! `nodeko publish` command - build the given paths and push the images.

use anyhow::{anyhow, Context, Result};
use nodeko_core::{
    config, Builder, Caching, Config, NodeBuild, Publisher, RegistryPublisher, RegistryResolver,
};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Repository prefix published images land under.
const DOCKER_REPO_ENV: &str = "NODEKO_DOCKER_REPO";

/// Build and publish one image per path, printing the published references.
///
/// Paths run concurrently through the caching builder, so duplicate paths on
/// the command line build only once.
pub async fn publish(base_dir: &Path, paths: &[String], tags: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let creation_time = config::creation_time_from_env()?;
    let default_base = nodeko_core::parse_reference(&config.default_base_image)
        .with_context(|| format!("'default_base_image': {:?}", config.default_base_image))?;
    let repo = std::env::var(DOCKER_REPO_ENV).map_err(|_| {
        anyhow!("{} must be set to the repository to publish under", DOCKER_REPO_ENV)
    })?;
    debug!(default_base = %config.default_base_image, repo = %repo, "Publisher configured");

    let resolver = Arc::new(RegistryResolver::new(default_base));
    let builder = Arc::new(NodeBuild::new(resolver).with_creation_time(creation_time));
    let cache = Arc::new(Caching::new(builder as Arc<dyn Builder>));
    let publisher = Arc::new(RegistryPublisher::new(repo).with_tags(tags));

    let jobs = paths.iter().map(|path| {
        let cache = Arc::clone(&cache);
        let publisher = Arc::clone(&publisher);
        let base_dir = base_dir.to_path_buf();
        let path = path.clone();
        async move {
            let name = cache.is_supported_reference(&base_dir, &path).ok_or_else(|| {
                anyhow!("{}: not a supported Node.js application (missing or unnamed package.json)", path)
            })?;
            let image = cache.build(&base_dir, &path).await?;
            let references = publisher.publish(&image, &name).await?;
            Ok::<_, anyhow::Error>(references)
        }
    });

    let published = futures::future::try_join_all(jobs).await?;
    for reference in published.into_iter().flatten() {
        println!("{}", reference);
    }
    Ok(())
}
