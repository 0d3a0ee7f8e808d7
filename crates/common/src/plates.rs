//! Plate data contracts shared by the aggregation core and the service.
//!
//! Every type here is a plain value. Records and clusters handed to callers
//! are snapshots: mutating them never feeds back into the aggregator.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opaque reference to a cropped plate bitmap.
pub type PlateImage = Arc<DynamicImage>;

/// Axis-aligned rectangle in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    /// `(x2 - x1) * (y2 - y1)`, computed at construction
    pub area: f32,
}

impl Rectangle {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            area: (x2 - x1) * (y2 - y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// True when the rectangle has positive extent on both axes.
    pub fn has_extent(&self) -> bool {
        self.x2 > self.x1 && self.y2 > self.y1
    }
}

/// One candidate object instance, before or after suppression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub rect: Rectangle,

    /// Class label resolved from the detector's class id
    pub label: String,

    /// Detector confidence (0.0 to 1.0)
    pub confidence: f32,

    /// Region cropped from the source frame, attached after suppression
    #[serde(skip)]
    pub crop: Option<PlateImage>,
}

impl Detection {
    pub fn new(rect: Rectangle, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            rect,
            label: label.into(),
            confidence,
            crop: None,
        }
    }
}

/// Text decoded from a fixed-slot recognizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedPlate {
    /// Decoded text with the trailing pad run removed
    pub text: String,

    /// One confidence per slot, including slots of the removed pad run
    pub confidence: Vec<f32>,
}

impl DecodedPlate {
    /// Arithmetic mean over every slot, padded ones included.
    pub fn mean_confidence(&self) -> f32 {
        if self.confidence.is_empty() {
            return 0.0;
        }
        self.confidence.iter().sum::<f32>() / self.confidence.len() as f32
    }
}

/// Session mode; only live capture drives the consecutive-reading counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Image,
    Video,
    LiveCapture,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::LiveCapture => "live_capture",
        }
    }
}

/// A quality-accepted reading ready to be aggregated
#[derive(Debug, Clone)]
pub struct PlateCandidate {
    pub text: String,
    pub mean_confidence: f32,
    pub rect: Rectangle,
    pub decoded: DecodedPlate,
    pub crop: Option<PlateImage>,
}

impl PlateCandidate {
    pub fn new(rect: Rectangle, decoded: DecodedPlate, crop: Option<PlateImage>) -> Self {
        Self {
            text: decoded.text.clone(),
            mean_confidence: decoded.mean_confidence(),
            rect,
            decoded,
            crop,
        }
    }
}

/// A reading recorded by the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateRecord {
    pub id: String,
    pub text: String,
    pub mean_confidence: f32,

    /// Unix timestamp in milliseconds at which the reading was submitted
    pub timestamp_ms: u64,

    pub rect: Rectangle,
    pub decoded: DecodedPlate,

    /// 1 for a raw reading; ranked results carry their cluster's total
    pub occurrences: u32,

    #[serde(skip)]
    pub crop: Option<PlateImage>,
}

/// Occurrence count of one spelling inside a cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCount {
    pub text: String,
    pub occurrences: u32,
}

/// Read-only view of a similarity cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub id: u64,
    pub representative_text: String,
    pub total_occurrences: u32,
    pub mean_confidence: f32,
    pub variants: Vec<VariantCount>,
    pub member_ids: Vec<String>,
}

/// Aggregate counters for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorStats {
    /// Readings stored in the history
    pub total_records: usize,

    /// Distinct clusters
    pub unique_plates: usize,
}
