//! NODEKO Core Library
//!
//! Builds OCI container images for Node.js applications straight from a
//! source directory, with no Dockerfile, and publishes them to a registry.

pub mod build;
pub mod config;
pub mod error;
pub mod publish;
pub mod registry;
pub mod types;

// Re-export commonly used items
pub use build::{BaseResolver, Builder, Caching, NodeBuild};
pub use config::Config;
pub use error::{NodekoError, Result};
pub use publish::{Publisher, RegistryPublisher};
pub use registry::{parse_reference, RegistryClient, RegistryResolver};
pub use types::{ConfigFile, Image, Layer};
