pub mod scripted;

use crate::detect::RawDetections;
use anyhow::Result;
use async_trait::async_trait;
use common::plates::{PlateImage, Rectangle};
use serde::{Deserialize, Serialize};

/// Metadata describing an inference engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub requires_gpu: bool,
}

/// A detected plate handed to the recognizer
#[derive(Debug, Clone)]
pub struct PlateRegion {
    /// Crop of the frame covered by `rect`
    pub image: PlateImage,

    /// Location in frame pixels
    pub rect: Rectangle,

    pub frame_width: u32,
    pub frame_height: u32,
}

/// Detector and recognizer models behind the frame pipeline.
///
/// An `Err` means inference itself failed; a frame without plates is an
/// empty [`RawDetections`].
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Unique engine identifier (e.g., "scripted")
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn version(&self) -> &'static str;

    fn requires_gpu(&self) -> bool {
        false
    }

    fn info(&self) -> EngineInfo {
        EngineInfo {
            id: self.id().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            version: self.version().to_string(),
            requires_gpu: self.requires_gpu(),
        }
    }

    /// Initialize with engine-specific configuration; `Null` keeps the defaults
    async fn init(&mut self, config: serde_json::Value) -> Result<()>;

    /// Run the detector over a full frame. Rows are in model-input space.
    async fn detect(&self, image: &image::DynamicImage) -> Result<RawDetections>;

    /// Run the recognizer over one plate, returning the flat
    /// `max_slots x alphabet` probability buffer.
    async fn recognize(&self, region: &PlateRegion) -> Result<Vec<f32>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}
