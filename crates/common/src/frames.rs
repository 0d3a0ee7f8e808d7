//! Frame and session contracts for the plate service.
//!
//! Frames travel as base64-encoded images; results carry every evaluated
//! plate, whether or not it was accepted into the aggregator.

use crate::plates::{AggregatorStats, CaptureMode, Detection, PlateRecord};
use serde::{Deserialize, Serialize};

/// Video frame submitted for plate recognition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Source camera, file or stream ID
    pub source_id: String,

    /// Frame timestamp (Unix timestamp in milliseconds)
    pub timestamp: u64,

    /// Frame sequence number
    pub sequence: u64,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Image format (e.g., "jpeg", "png")
    pub format: String,

    /// Frame data (base64 encoded for JSON transport)
    pub data: String,
}

/// Request to start a recognition session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartRequest {
    pub mode: CaptureMode,
}

/// Current session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier, regenerated on every start
    pub session_id: String,

    /// Active mode, `None` when no session is running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<CaptureMode>,

    /// False once live capture has been stopped by repeated readings
    pub capture_active: bool,

    /// Frames received, including rejected ones
    pub frames_received: u64,

    /// Frames that completed inference
    pub frames_processed: u64,

    pub stats: AggregatorStats,
}

/// One plate evaluated on a frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePlate {
    pub detection: Detection,
    pub text: String,
    pub mean_confidence: f32,
    pub quality_score: f64,
    pub accepted: bool,

    /// Unsatisfied quality criteria, for diagnostics
    #[serde(default)]
    pub issues: Vec<String>,

    /// Record created by the aggregator, if the plate was inserted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

/// Result of processing one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameResult {
    pub source_id: String,
    pub sequence: u64,
    pub plates: Vec<FramePlate>,

    /// True when this frame confirmed a plate and stopped live capture
    pub stop_signaled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

/// Ranked plate list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestPlatesResponse {
    pub plates: Vec<PlateView>,
}

/// Record as exposed over HTTP, with an optional PNG crop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateView {
    #[serde(flatten)]
    pub record: PlateRecord,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_png_base64: Option<String>,
}
