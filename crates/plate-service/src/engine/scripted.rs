//! Inference engine that replays a fixed scene.
//!
//! The scene lists plates in normalized frame coordinates. Detection reports
//! every listed plate on every frame; recognition looks up the listed plate
//! overlapping the requested region most and emits a one-hot buffer spelling
//! its text. Useful for demos and for exercising the pipeline end to end
//! without model files.

use super::{InferenceEngine, PlateRegion};
use crate::config::OcrConfig;
use crate::detect::geometry::iou;
use crate::detect::RawDetections;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use common::plates::Rectangle;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedPlate {
    /// Corners as fractions of the frame size
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,

    pub text: String,

    /// Detector confidence
    #[serde(default = "default_detection_confidence")]
    pub confidence: f32,

    /// Recognizer confidence for every slot without an explicit value
    #[serde(default = "default_char_confidence")]
    pub char_confidence: f32,

    /// Per-slot recognizer confidences, overriding `char_confidence`
    #[serde(default)]
    pub slot_confidences: Option<Vec<f32>>,

    #[serde(default)]
    pub class_id: u32,
}

fn default_detection_confidence() -> f32 {
    0.9
}

fn default_char_confidence() -> f32 {
    0.95
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedEngineConfig {
    #[serde(default)]
    pub plates: Vec<ScriptedPlate>,

    /// Make every detection call fail
    #[serde(default)]
    pub fail_detection: bool,

    /// Simulate processing delay in milliseconds
    #[serde(default)]
    pub simulated_delay_ms: u64,
}

pub struct ScriptedEngine {
    config: ScriptedEngineConfig,
    model_input_size: u32,
    ocr: OcrConfig,
}

impl ScriptedEngine {
    /// Empty scene producing detector rows for a `model_input_size` square
    /// input and recognizer buffers in the `ocr` layout.
    pub fn new(model_input_size: u32, ocr: OcrConfig) -> Self {
        Self {
            config: ScriptedEngineConfig::default(),
            model_input_size,
            ocr,
        }
    }

    pub fn config(&self) -> &ScriptedEngineConfig {
        &self.config
    }

    /// Read a scene from a JSON file
    pub fn load_script(path: impl AsRef<Path>) -> Result<serde_json::Value> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine script {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse engine script {}", path.display()))
    }

    fn validate(&self, config: &ScriptedEngineConfig) -> Result<()> {
        let alphabet = self.ocr.alphabet_chars();
        for plate in &config.plates {
            if plate.text.chars().count() > self.ocr.max_slots {
                return Err(anyhow!(
                    "Scripted plate '{}' is longer than {} slots",
                    plate.text,
                    self.ocr.max_slots
                ));
            }
            if let Some(c) = plate.text.chars().find(|c| !alphabet.contains(c)) {
                return Err(anyhow!(
                    "Scripted plate '{}' uses character '{}' outside the alphabet",
                    plate.text,
                    c
                ));
            }
            if let Some(slots) = &plate.slot_confidences {
                if slots.len() != self.ocr.max_slots {
                    return Err(anyhow!(
                        "Scripted plate '{}' has {} slot confidences, expected {}",
                        plate.text,
                        slots.len(),
                        self.ocr.max_slots
                    ));
                }
            }
        }
        Ok(())
    }

    fn spell(&self, plate: &ScriptedPlate) -> Vec<f32> {
        let alphabet = self.ocr.alphabet_chars();
        let mut buffer = vec![0.0; self.ocr.max_slots * alphabet.len()];
        let mut chars = plate.text.chars();

        for slot in 0..self.ocr.max_slots {
            let c = chars.next().unwrap_or(self.ocr.pad_char);
            let index = alphabet.iter().position(|a| *a == c).unwrap_or(0);
            let confidence = plate
                .slot_confidences
                .as_ref()
                .and_then(|slots| slots.get(slot).copied())
                .unwrap_or(plate.char_confidence);
            buffer[slot * alphabet.len() + index] = confidence;
        }

        buffer
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn id(&self) -> &'static str {
        "scripted"
    }

    fn name(&self) -> &'static str {
        "Scripted Plate Engine"
    }

    fn description(&self) -> &'static str {
        "Replays a fixed scene of plates without model files"
    }

    fn version(&self) -> &'static str {
        "1.0.0"
    }

    async fn init(&mut self, config: serde_json::Value) -> Result<()> {
        if !config.is_null() {
            let config: ScriptedEngineConfig = serde_json::from_value(config)?;
            self.validate(&config)?;
            self.config = config;
        }
        tracing::info!(
            plates = self.config.plates.len(),
            fail_detection = self.config.fail_detection,
            "Initialized ScriptedEngine"
        );
        Ok(())
    }

    async fn detect(&self, _image: &image::DynamicImage) -> Result<RawDetections> {
        if self.config.simulated_delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.simulated_delay_ms,
            ))
            .await;
        }

        if self.config.fail_detection {
            return Err(anyhow!("scripted detector failure"));
        }

        let size = self.model_input_size as f32;
        let rows: Vec<[f32; 6]> = self
            .config
            .plates
            .iter()
            .map(|p| {
                [
                    p.class_id as f32,
                    p.x1 * size,
                    p.y1 * size,
                    p.x2 * size,
                    p.y2 * size,
                    p.confidence,
                ]
            })
            .collect();

        Ok(RawDetections::from_rows(&rows))
    }

    async fn recognize(&self, region: &PlateRegion) -> Result<Vec<f32>> {
        if region.frame_width == 0 || region.frame_height == 0 {
            return Err(anyhow!("Plate region comes from an empty frame"));
        }

        let width = region.frame_width as f32;
        let height = region.frame_height as f32;
        let normalized = Rectangle::new(
            region.rect.x1 / width,
            region.rect.y1 / height,
            region.rect.x2 / width,
            region.rect.y2 / height,
        );

        let matched = self
            .config
            .plates
            .iter()
            .map(|p| (p, iou(&normalized, &Rectangle::new(p.x1, p.y1, p.x2, p.y2))))
            .filter(|(_, overlap)| *overlap > 0.0)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(p, _)| p)
            .ok_or_else(|| anyhow!("No scripted plate overlaps region {:?}", region.rect))?;

        Ok(self.spell(matched))
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down ScriptedEngine");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::TextDecoder;
    use image::{DynamicImage, RgbImage};
    use std::sync::Arc;

    fn engine() -> ScriptedEngine {
        ScriptedEngine::new(384, OcrConfig::default())
    }

    fn scene() -> serde_json::Value {
        serde_json::json!({
            "plates": [
                { "x1": 0.1, "y1": 0.5, "x2": 0.4, "y2": 0.6, "text": "AB1234" },
                { "x1": 0.6, "y1": 0.5, "x2": 0.9, "y2": 0.6, "text": "XY999", "confidence": 0.8 }
            ]
        })
    }

    fn region(rect: Rectangle) -> PlateRegion {
        PlateRegion {
            image: Arc::new(DynamicImage::ImageRgb8(RgbImage::new(4, 4))),
            rect,
            frame_width: 640,
            frame_height: 480,
        }
    }

    #[tokio::test]
    async fn test_init_and_info() {
        let mut engine = engine();
        engine.init(scene()).await.unwrap();
        assert_eq!(engine.config().plates.len(), 2);
        assert_eq!(engine.config().plates[0].confidence, 0.9);
        assert_eq!(engine.info().id, "scripted");
        assert!(engine.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_init_rejects_foreign_characters() {
        let mut engine = engine();
        let err = engine
            .init(serde_json::json!({
                "plates": [{ "x1": 0.0, "y1": 0.0, "x2": 0.5, "y2": 0.5, "text": "ab-12" }]
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the alphabet"));

        let err = engine
            .init(serde_json::json!({
                "plates": [{ "x1": 0.0, "y1": 0.0, "x2": 0.5, "y2": 0.5, "text": "ABCDEFGHIJK" }]
            }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("longer than"));
    }

    #[tokio::test]
    async fn test_detect_emits_model_space_rows() {
        let mut engine = engine();
        engine.init(scene()).await.unwrap();

        let raw = engine
            .detect(&DynamicImage::ImageRgb8(RgbImage::new(640, 480)))
            .await
            .unwrap();
        assert_eq!(raw.row_count(), 2);
        assert!((raw.data[1] - 38.4).abs() < 1e-3);
        assert!((raw.data[6] - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_detect_failure() {
        let mut engine = engine();
        engine
            .init(serde_json::json!({ "fail_detection": true }))
            .await
            .unwrap();
        assert!(engine
            .detect(&DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_recognize_spells_overlapping_plate() {
        let mut engine = engine();
        engine.init(scene()).await.unwrap();
        let decoder = TextDecoder::new(&OcrConfig::default());

        let output = engine
            .recognize(&region(Rectangle::new(390.0, 240.0, 575.0, 290.0)))
            .await
            .unwrap();
        let decoded = decoder.decode(&output).unwrap();
        assert_eq!(decoded.text, "XY999");
        assert_eq!(decoded.confidence.len(), 9);
        assert!((decoded.mean_confidence() - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_recognize_without_match_fails() {
        let mut engine = engine();
        engine.init(scene()).await.unwrap();
        assert!(engine
            .recognize(&region(Rectangle::new(0.0, 0.0, 20.0, 20.0)))
            .await
            .is_err());
    }
}
