pub mod aggregator;
pub mod api;
pub mod capture_gate;
pub mod config;
pub mod detect;
pub mod engine;
pub mod ocr;
pub mod pipeline;
pub mod quality;
pub mod similarity;
pub mod state;

pub use aggregator::{AggregateError, DetectionAggregator, SubmitOutcome};
pub use capture_gate::CaptureGate;
pub use config::{PipelineConfig, ServiceConfig};
pub use engine::InferenceEngine;
pub use pipeline::FramePipeline;
pub use state::{ServiceState, SessionError};
