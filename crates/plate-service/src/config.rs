use anyhow::{anyhow, Context, Result};
use common::validation::{validate_probability, validate_range};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// Node ID for this recognizer instance
    pub node_id: String,

    /// Tunables for the detection-to-text pipeline
    pub pipeline: PipelineConfig,

    /// JSON script for the scripted inference engine
    pub engine_script: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr =
            env::var("PLATE_SERVICE_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let node_id = env::var("NODE_ID").unwrap_or_else(|_| {
            format!(
                "plate-service-{}",
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            )
        });

        let mut pipeline = match env::var("PLATE_PIPELINE_CONFIG") {
            Ok(path) => PipelineConfig::from_file(&path)?,
            Err(_) => PipelineConfig::default(),
        };

        if let Ok(required) = env::var("PLATE_CONSECUTIVE_REQUIRED") {
            pipeline.aggregator.consecutive_required = required
                .parse()
                .context("Invalid PLATE_CONSECUTIVE_REQUIRED")?;
        }
        if let Ok(timeout) = env::var("PLATE_CONSECUTIVE_TIMEOUT_MS") {
            pipeline.aggregator.consecutive_timeout_ms = timeout
                .parse()
                .context("Invalid PLATE_CONSECUTIVE_TIMEOUT_MS")?;
        }
        pipeline.validate()?;

        let engine_script = env::var("PLATE_ENGINE_SCRIPT").ok().map(PathBuf::from);

        Ok(Self {
            bind_addr,
            node_id,
            pipeline,
            engine_script,
        })
    }
}

/// Every tunable of the pipeline, grouped by stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Plates whose mean slot confidence is below this are dropped before scoring
    #[serde(default = "default_display_confidence")]
    pub display_confidence_threshold: f32,
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse pipeline config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        validate_range(detection.model_input_size, 1, 8192, "detection.model_input_size")?;
        validate_probability(detection.confidence_threshold, "detection.confidence_threshold")?;
        validate_probability(detection.iou_threshold, "detection.iou_threshold")?;
        if !detection.min_box_area.is_finite() || detection.min_box_area < 0.0 {
            return Err(anyhow!("detection.min_box_area must be a non-negative number"));
        }

        let ocr = &self.ocr;
        validate_range(ocr.max_slots, 1, 64, "ocr.max_slots")?;
        if ocr.alphabet.is_empty() {
            return Err(anyhow!("ocr.alphabet cannot be empty"));
        }

        let quality = &self.quality;
        validate_range(quality.accept_threshold, 0.0, 1.0, "quality.accept_threshold")?;
        if quality.min_length > quality.max_length {
            return Err(anyhow!(
                "quality.min_length ({}) exceeds quality.max_length ({})",
                quality.min_length,
                quality.max_length
            ));
        }
        validate_probability(quality.min_mean_confidence, "quality.min_mean_confidence")?;
        validate_probability(quality.min_char_confidence, "quality.min_char_confidence")?;

        let aggregator = &self.aggregator;
        validate_range(
            aggregator.similarity_threshold,
            0.0,
            1.0,
            "aggregator.similarity_threshold",
        )?;
        validate_range(
            aggregator.consecutive_required,
            1,
            u32::MAX,
            "aggregator.consecutive_required",
        )?;

        validate_probability(self.display_confidence_threshold, "display_confidence_threshold")
    }
}

/// Detector output post-processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Square model input resolution the detector coordinates refer to
    #[serde(default = "default_model_input_size")]
    pub model_input_size: u32,

    /// Rows at or below this confidence are discarded
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// Same-label boxes overlapping a keeper at or above this IoU are suppressed
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Boxes with an area at or below this (in image pixels) are discarded
    #[serde(default = "default_min_box_area")]
    pub min_box_area: f32,

    /// Class names indexed by detector class id
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
}

/// Recognizer output layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Character slots produced per plate
    #[serde(default = "default_max_slots")]
    pub max_slots: usize,

    /// Characters indexed by recognizer class
    #[serde(default = "default_alphabet")]
    pub alphabet: String,

    /// Filler emitted for unused trailing slots
    #[serde(default = "default_pad_char")]
    pub pad_char: char,
}

impl OcrConfig {
    pub fn alphabet_chars(&self) -> Vec<char> {
        self.alphabet.chars().collect()
    }
}

/// Acceptance gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,

    #[serde(default = "default_min_length")]
    pub min_length: usize,

    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_min_mean_confidence")]
    pub min_mean_confidence: f32,

    #[serde(default = "default_min_char_confidence")]
    pub min_char_confidence: f32,
}

/// Clustering and live-capture confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Texts at or above this similarity join the same cluster
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// A gap longer than this resets a text's consecutive count
    #[serde(default = "default_consecutive_timeout_ms")]
    pub consecutive_timeout_ms: u64,

    /// Consecutive readings that stop a live capture
    #[serde(default = "default_consecutive_required")]
    pub consecutive_required: u32,

    /// Default size of the ranked result list
    #[serde(default = "default_best_limit")]
    pub best_limit: usize,
}

fn default_model_input_size() -> u32 {
    384
}

fn default_confidence() -> f32 {
    0.6
}

fn default_iou_threshold() -> f32 {
    0.7
}

fn default_min_box_area() -> f32 {
    25.0
}

fn default_class_names() -> Vec<String> {
    vec!["license_plate".to_string()]
}

fn default_max_slots() -> usize {
    9
}

fn default_alphabet() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_".to_string()
}

fn default_pad_char() -> char {
    '_'
}

fn default_accept_threshold() -> f64 {
    0.7
}

fn default_min_length() -> usize {
    4
}

fn default_max_length() -> usize {
    10
}

fn default_min_mean_confidence() -> f32 {
    0.7
}

fn default_min_char_confidence() -> f32 {
    0.5
}

fn default_similarity_threshold() -> f64 {
    0.8
}

fn default_consecutive_timeout_ms() -> u64 {
    5000
}

fn default_consecutive_required() -> u32 {
    10
}

fn default_best_limit() -> usize {
    10
}

fn default_display_confidence() -> f32 {
    0.7
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model_input_size: default_model_input_size(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            min_box_area: default_min_box_area(),
            class_names: default_class_names(),
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            max_slots: default_max_slots(),
            alphabet: default_alphabet(),
            pad_char: default_pad_char(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            accept_threshold: default_accept_threshold(),
            min_length: default_min_length(),
            max_length: default_max_length(),
            min_mean_confidence: default_min_mean_confidence(),
            min_char_confidence: default_min_char_confidence(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            consecutive_timeout_ms: default_consecutive_timeout_ms(),
            consecutive_required: default_consecutive_required(),
            best_limit: default_best_limit(),
        }
    }
}
