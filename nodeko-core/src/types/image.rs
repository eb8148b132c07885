//! Image domain types.
//!
//! `Image` carries everything needed to push a container image: the ordered
//! layer blobs and the parsed OCI config file. The config model keeps any
//! fields it does not know about in a flattened map, so rewriting a base
//! image's configuration never drops data the registry gave us.

use crate::error::{NodekoError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OCI image config file (the JSON blob referenced by the manifest).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Creation timestamp of the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// Tool or person that produced the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Image architecture (amd64, arm64).
    #[serde(default)]
    pub architecture: String,

    /// Operating system (linux).
    #[serde(default)]
    pub os: String,

    /// Runtime configuration.
    #[serde(default)]
    pub config: ContainerConfig,

    /// Legacy container-config field mirrored by Docker tooling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_config: Option<ContainerConfig>,

    /// Layer diff-ids, oldest first.
    #[serde(default)]
    pub rootfs: RootFs,

    /// One entry per layer-producing (or metadata) build step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,

    /// Fields we do not model, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Container runtime configuration from an OCI config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(rename = "User", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(rename = "ExposedPorts", default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<HashMap<String, serde_json::Value>>,

    #[serde(rename = "Env", default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,

    #[serde(rename = "Entrypoint", default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,

    #[serde(rename = "Cmd", default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,

    #[serde(rename = "Volumes", default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<HashMap<String, serde_json::Value>>,

    #[serde(rename = "WorkingDir", default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(rename = "Labels", default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,

    #[serde(rename = "StopSignal", default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Root filesystem description: the ordered uncompressed-layer digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,

    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self { fs_type: "layers".to_string(), diff_ids: Vec::new() }
    }
}

/// History entry for one layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

/// A compressed layer blob as stored in (or destined for) a registry.
#[derive(Debug, Clone)]
pub struct LayerBlob {
    /// Media type of the blob (Docker or OCI gzip layer).
    pub media_type: String,

    /// The gzip-compressed tar bytes.
    pub data: Vec<u8>,
}

/// A fully assembled layer ready to be appended to an image.
#[derive(Debug, Clone)]
pub struct Layer {
    /// The compressed blob.
    pub blob: LayerBlob,

    /// sha256 digest of the uncompressed tar stream.
    pub diff_id: String,

    /// History entry describing how the layer came to be.
    pub history: History,
}

/// A container image: base layers plus anything appended, and the config.
///
/// `Image` values are owned and cloned by value; assembling a new image
/// never mutates the object the base was resolved from.
#[derive(Debug, Clone)]
pub struct Image {
    /// Ordered layer blobs, base first.
    pub layers: Vec<LayerBlob>,

    /// Parsed config file.
    pub config: ConfigFile,

    /// Media type to publish the config blob under.
    pub config_media_type: String,

    /// Manifest digest of the image this was resolved from, when known.
    pub digest: Option<String>,
}

impl Image {
    /// Append a layer: blob, diff-id, and history move into the image
    /// together so the three sequences never get out of step.
    pub fn append_layer(&mut self, layer: Layer) {
        self.layers.push(layer.blob);
        self.config.rootfs.diff_ids.push(layer.diff_id);
        self.config.history.push(layer.history);
    }

    /// Serialize the config file for upload.
    pub fn config_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.config).map_err(|e| NodekoError::InvalidImageConfig {
            reason: format!("failed to serialize image config: {}", e),
        })
    }
}
