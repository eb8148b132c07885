//! Shared domain types.

pub mod image;

pub use image::{ConfigFile, ContainerConfig, History, Image, Layer, LayerBlob, RootFs};
