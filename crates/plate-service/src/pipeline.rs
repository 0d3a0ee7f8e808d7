//! Detection-to-text pipeline for a single frame.

use crate::config::PipelineConfig;
use crate::detect::postprocess::crop_region;
use crate::detect::BoxPostProcessor;
use crate::engine::{InferenceEngine, PlateRegion};
use crate::ocr::TextDecoder;
use crate::quality::{QualityEvaluator, QualityReport};
use anyhow::{Context, Result};
use common::plates::{DecodedPlate, Detection, PlateCandidate};
use image::DynamicImage;
use std::sync::Arc;
use telemetry::metrics::{PLATE_DECODE_ERRORS, PLATE_DETECTIONS_KEPT, PLATE_QUALITY_EVALUATIONS};
use tracing::{debug, warn};

/// A recognized plate together with its quality verdict
#[derive(Debug, Clone)]
pub struct EvaluatedPlate {
    pub detection: Detection,
    pub decoded: DecodedPlate,
    pub mean_confidence: f32,
    pub report: QualityReport,
}

impl EvaluatedPlate {
    pub fn accepted(&self) -> bool {
        self.report.accepted
    }

    pub fn candidate(&self) -> PlateCandidate {
        PlateCandidate::new(
            self.detection.rect,
            self.decoded.clone(),
            self.detection.crop.clone(),
        )
    }
}

pub struct FramePipeline {
    postprocessor: BoxPostProcessor,
    decoder: TextDecoder,
    quality: QualityEvaluator,
    display_confidence_threshold: f32,
}

impl FramePipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            postprocessor: BoxPostProcessor::new(config.detection.clone()),
            decoder: TextDecoder::new(&config.ocr),
            quality: QualityEvaluator::new(config.quality.clone()),
            display_confidence_threshold: config.display_confidence_threshold,
        }
    }

    /// Detect, recognize and score every plate on `image`.
    ///
    /// Detector failures and malformed detector output abort the frame. A
    /// plate whose recognition fails is logged and skipped.
    pub async fn run(
        &self,
        engine: &dyn InferenceEngine,
        image: &DynamicImage,
    ) -> Result<Vec<EvaluatedPlate>> {
        let raw = engine
            .detect(image)
            .await
            .with_context(|| format!("Plate detection failed in engine '{}'", engine.id()))?;
        let detections = self
            .postprocessor
            .process_image(&raw, image)
            .context("Malformed detector output")?;
        PLATE_DETECTIONS_KEPT.inc_by(detections.len() as u64);

        let mut plates = Vec::with_capacity(detections.len());
        for detection in detections {
            let crop = match &detection.crop {
                Some(crop) => Arc::clone(crop),
                None => Arc::new(crop_region(image, &detection.rect)),
            };
            let region = PlateRegion {
                image: crop,
                rect: detection.rect,
                frame_width: image.width(),
                frame_height: image.height(),
            };

            let output = match engine.recognize(&region).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(rect = ?detection.rect, error = %e, "Plate recognition failed, skipping");
                    continue;
                }
            };

            let decoded = match self.decoder.decode(&output) {
                Ok(decoded) => decoded,
                Err(e) => {
                    PLATE_DECODE_ERRORS.inc();
                    warn!(rect = ?detection.rect, error = %e, "Malformed recognizer output, skipping");
                    continue;
                }
            };

            let mean_confidence = decoded.mean_confidence();
            if mean_confidence < self.display_confidence_threshold {
                debug!(
                    text = %decoded.text,
                    mean_confidence,
                    "Reading below display confidence"
                );
                continue;
            }

            let report = self.quality.evaluate(&decoded, mean_confidence);
            PLATE_QUALITY_EVALUATIONS
                .with_label_values(&[if report.accepted { "accepted" } else { "rejected" }])
                .inc();

            debug!(
                text = %decoded.text,
                mean_confidence,
                score = report.score,
                accepted = report.accepted,
                "Evaluated plate"
            );

            plates.push(EvaluatedPlate {
                detection,
                decoded,
                mean_confidence,
                report,
            });
        }

        Ok(plates)
    }
}
