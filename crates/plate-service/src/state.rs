use crate::aggregator::{DetectionAggregator, SubmitOutcome};
use crate::capture_gate::CaptureGate;
use crate::config::PipelineConfig;
use crate::engine::InferenceEngine;
use crate::pipeline::FramePipeline;
use anyhow::{anyhow, Context};
use base64::Engine as _;
use common::frames::{FramePlate, FrameResult, SessionInfo, VideoFrame};
use common::plates::{CaptureMode, ClusterSnapshot, PlateRecord};
use common::validation::{validate_frame_dimensions, validate_id};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use telemetry::metrics::{
    PLATE_AGGREGATOR_SUBMISSIONS, PLATE_CAPTURE_STOPS, PLATE_FRAMES_PROCESSED,
    PLATE_INFERENCE_TIME, PLATE_UNIQUE_PLATES,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No recognition session is active")]
    NoSession,

    #[error("Another frame is still being processed")]
    Busy,

    #[error("Live capture already stopped after a confirmed plate")]
    CaptureStopped,

    #[error("Invalid frame: {0:#}")]
    InvalidFrame(anyhow::Error),

    #[error("Inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("Internal error: {0:#}")]
    Internal(anyhow::Error),
}

struct Session {
    id: String,
    mode: Option<CaptureMode>,
    aggregator: DetectionAggregator,
    frames_received: u64,
    frames_processed: u64,
}

/// Clears the busy flag when a frame finishes, however it finishes
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<ServiceStateInner>,
}

struct ServiceStateInner {
    node_id: String,
    config: PipelineConfig,
    engine: Arc<RwLock<dyn InferenceEngine>>,
    pipeline: FramePipeline,
    session: Mutex<Session>,
    busy: AtomicBool,
    capture_active: Arc<AtomicBool>,
    gate: CaptureGate,
}

impl ServiceState {
    pub fn new(
        node_id: String,
        config: PipelineConfig,
        engine: Arc<RwLock<dyn InferenceEngine>>,
    ) -> Self {
        let capture_active = Arc::new(AtomicBool::new(true));
        let stop_flag = Arc::clone(&capture_active);
        let gate = CaptureGate::new(Arc::new(move || {
            stop_flag.store(false, Ordering::Release);
        }));

        Self {
            inner: Arc::new(ServiceStateInner {
                node_id,
                pipeline: FramePipeline::new(&config),
                session: Mutex::new(Session {
                    id: uuid::Uuid::new_v4().to_string(),
                    mode: None,
                    aggregator: DetectionAggregator::new(config.aggregator.clone()),
                    frames_received: 0,
                    frames_processed: 0,
                }),
                config,
                engine,
                busy: AtomicBool::new(false),
                capture_active,
                gate,
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> Arc<RwLock<dyn InferenceEngine>> {
        Arc::clone(&self.inner.engine)
    }

    pub fn capture_active(&self) -> bool {
        self.inner.capture_active.load(Ordering::Acquire)
    }

    fn session(&self) -> Result<MutexGuard<'_, Session>, SessionError> {
        self.inner
            .session
            .lock()
            .map_err(|e| SessionError::Internal(anyhow!("Session lock poisoned: {}", e)))
    }

    fn info(&self, session: &Session) -> SessionInfo {
        SessionInfo {
            session_id: session.id.clone(),
            mode: session.mode,
            capture_active: self.capture_active(),
            frames_received: session.frames_received,
            frames_processed: session.frames_processed,
            stats: session.aggregator.stats(),
        }
    }

    /// Start a fresh session, discarding everything from the previous one.
    pub fn start_session(&self, mode: CaptureMode) -> Result<SessionInfo, SessionError> {
        let mut session = self.session()?;
        session.aggregator.clear();
        session.id = uuid::Uuid::new_v4().to_string();
        session.mode = Some(mode);
        session.frames_received = 0;
        session.frames_processed = 0;

        self.inner.gate.reset();
        self.inner.capture_active.store(true, Ordering::Release);
        PLATE_UNIQUE_PLATES.set(0);

        info!(session_id = %session.id, mode = mode.as_str(), "Started recognition session");
        Ok(self.info(&session))
    }

    /// End the session and drop its plates. Ending twice is harmless.
    pub fn end_session(&self) -> Result<SessionInfo, SessionError> {
        let mut session = self.session()?;
        session.aggregator.clear();
        session.mode = None;
        PLATE_UNIQUE_PLATES.set(0);

        info!(session_id = %session.id, "Ended recognition session");
        Ok(self.info(&session))
    }

    pub fn session_info(&self) -> Result<SessionInfo, SessionError> {
        let session = self.session()?;
        Ok(self.info(&session))
    }

    pub fn best_detections(&self, limit: usize) -> Result<Vec<PlateRecord>, SessionError> {
        Ok(self.session()?.aggregator.best_detections(limit))
    }

    pub fn record(&self, id: &str) -> Result<Option<PlateRecord>, SessionError> {
        Ok(self.session()?.aggregator.record(id))
    }

    pub fn clusters(&self) -> Result<Vec<ClusterSnapshot>, SessionError> {
        Ok(self.session()?.aggregator.clusters())
    }

    /// Run one frame through the pipeline and aggregate its accepted plates.
    pub async fn process_frame(&self, frame: VideoFrame) -> Result<FrameResult, SessionError> {
        let (session_id, mode) = {
            let mut session = self.session()?;
            let mode = session.mode.ok_or(SessionError::NoSession)?;
            session.frames_received += 1;
            if !self.capture_active() {
                return Err(SessionError::CaptureStopped);
            }
            (session.id.clone(), mode)
        };

        let _in_flight = InFlight::acquire(&self.inner.busy).ok_or(SessionError::Busy)?;

        let image = decode_frame(&frame).map_err(|e| {
            PLATE_FRAMES_PROCESSED
                .with_label_values(&[mode.as_str(), "invalid"])
                .inc();
            SessionError::InvalidFrame(e)
        })?;

        let start = std::time::Instant::now();
        let engine = self.inner.engine.read().await;
        let engine_id = engine.id();
        let evaluated = self.inner.pipeline.run(&*engine, &image).await;
        drop(engine);
        let elapsed = start.elapsed();

        PLATE_INFERENCE_TIME
            .with_label_values(&[engine_id])
            .observe(elapsed.as_secs_f64());

        let evaluated = evaluated.map_err(|e| {
            PLATE_FRAMES_PROCESSED
                .with_label_values(&[mode.as_str(), "error"])
                .inc();
            SessionError::Inference(e)
        })?;
        PLATE_FRAMES_PROCESSED
            .with_label_values(&[mode.as_str(), "success"])
            .inc();

        let mut session = self.session()?;
        let current = session.id == session_id && session.mode.is_some();
        if current {
            session.frames_processed += 1;
        } else {
            warn!(
                source_id = %frame.source_id,
                sequence = frame.sequence,
                "Session changed while the frame was in flight, discarding its plates"
            );
        }

        let mut stop_signaled = false;
        let mut plates = Vec::with_capacity(evaluated.len());
        for plate in evaluated {
            let mut record_id = None;

            if current && plate.accepted() && self.capture_active() {
                match session.aggregator.submit(plate.candidate(), mode) {
                    Ok(SubmitOutcome::Inserted(record)) => {
                        PLATE_AGGREGATOR_SUBMISSIONS
                            .with_label_values(&["inserted"])
                            .inc();
                        record_id = Some(record.id);
                    }
                    Ok(SubmitOutcome::Stop { text, consecutive }) => {
                        PLATE_AGGREGATOR_SUBMISSIONS.with_label_values(&["stop"]).inc();
                        if self.inner.gate.signal() {
                            PLATE_CAPTURE_STOPS.inc();
                            stop_signaled = true;
                            info!(
                                session_id = %session_id,
                                text = %text,
                                consecutive,
                                "Live capture stopped"
                            );
                        }
                    }
                    Err(e) => {
                        PLATE_AGGREGATOR_SUBMISSIONS
                            .with_label_values(&["rejected"])
                            .inc();
                        warn!(text = %plate.decoded.text, error = %e, "Aggregator rejected plate");
                    }
                }
            }

            plates.push(FramePlate {
                text: plate.decoded.text.clone(),
                mean_confidence: plate.mean_confidence,
                quality_score: plate.report.score,
                accepted: plate.report.accepted,
                issues: plate.report.issues.iter().map(ToString::to_string).collect(),
                detection: plate.detection,
                record_id,
            });
        }

        PLATE_UNIQUE_PLATES.set(session.aggregator.stats().unique_plates as i64);
        drop(session);

        let processing_time_ms = elapsed.as_millis() as u64;
        debug!(
            source_id = %frame.source_id,
            sequence = frame.sequence,
            plates = plates.len(),
            processing_time_ms,
            "Processed frame"
        );

        Ok(FrameResult {
            source_id: frame.source_id,
            sequence: frame.sequence,
            plates,
            stop_signaled,
            processing_time_ms: Some(processing_time_ms),
        })
    }

    pub async fn ready(&self) -> bool {
        let engine = self.inner.engine.read().await;
        engine.health_check().await.unwrap_or(false)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        info!("Shutting down plate service...");
        self.end_session()
            .map_err(|e| anyhow!("Failed to end session: {}", e))?;
        self.inner.engine.write().await.shutdown().await?;
        info!("Plate service shutdown complete");
        Ok(())
    }
}

fn decode_frame(frame: &VideoFrame) -> anyhow::Result<image::DynamicImage> {
    validate_id(&frame.source_id, "source_id")?;
    validate_frame_dimensions(frame.width, frame.height)?;

    let bytes = base64::prelude::BASE64_STANDARD
        .decode(&frame.data)
        .context("Frame data is not valid base64")?;
    let image = image::load_from_memory(&bytes).context("Frame data is not a decodable image")?;

    if image.width() != frame.width || image.height() != frame.height {
        debug!(
            declared_width = frame.width,
            declared_height = frame.height,
            width = image.width(),
            height = image.height(),
            "Frame dimensions differ from the decoded image"
        );
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrConfig;
    use crate::engine::scripted::ScriptedEngine;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    async fn state(required: u32) -> ServiceState {
        let mut config = PipelineConfig::default();
        config.aggregator.consecutive_required = required;

        let mut engine = ScriptedEngine::new(config.detection.model_input_size, OcrConfig::default());
        engine
            .init(serde_json::json!({
                "plates": [{ "x1": 0.1, "y1": 0.5, "x2": 0.4, "y2": 0.6, "text": "AB1234" }]
            }))
            .await
            .unwrap();

        ServiceState::new("test-node".to_string(), config, Arc::new(RwLock::new(engine)))
    }

    fn frame(sequence: u64) -> VideoFrame {
        let image = DynamicImage::ImageRgb8(RgbImage::new(64, 48));
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        VideoFrame {
            source_id: "cam-1".to_string(),
            timestamp: 1_700_000_000_000,
            sequence,
            width: 64,
            height: 48,
            format: "png".to_string(),
            data: base64::prelude::BASE64_STANDARD.encode(png),
        }
    }

    #[tokio::test]
    async fn test_frame_without_session_is_rejected() {
        let state = state(10).await;
        assert!(matches!(
            state.process_frame(frame(0)).await,
            Err(SessionError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_video_frames_are_aggregated() {
        let state = state(10).await;
        state.start_session(CaptureMode::Video).unwrap();

        for sequence in 0..3 {
            let result = state.process_frame(frame(sequence)).await.unwrap();
            assert_eq!(result.plates.len(), 1);
            assert!(result.plates[0].accepted);
            assert!(result.plates[0].record_id.is_some());
            assert!(!result.stop_signaled);
        }

        let best = state.best_detections(10).unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].text, "AB1234");
        assert_eq!(best[0].occurrences, 3);

        let info = state.session_info().unwrap();
        assert_eq!(info.frames_received, 3);
        assert_eq!(info.frames_processed, 3);
        assert_eq!(info.stats.total_records, 3);
    }

    #[tokio::test]
    async fn test_live_capture_stops_once() {
        let state = state(2).await;
        state.start_session(CaptureMode::LiveCapture).unwrap();

        let first = state.process_frame(frame(0)).await.unwrap();
        assert!(!first.stop_signaled);

        let second = state.process_frame(frame(1)).await.unwrap();
        assert!(second.stop_signaled);
        assert!(second.plates[0].record_id.is_none());
        assert!(!state.capture_active());

        assert!(matches!(
            state.process_frame(frame(2)).await,
            Err(SessionError::CaptureStopped)
        ));

        // Restart re-arms the gate
        state.start_session(CaptureMode::LiveCapture).unwrap();
        assert!(state.capture_active());
        assert!(state.process_frame(frame(3)).await.is_ok());
    }

    #[tokio::test]
    async fn test_busy_frame_is_rejected() {
        let state = state(10).await;
        state.start_session(CaptureMode::Video).unwrap();

        let _held = InFlight::acquire(&state.inner.busy).unwrap();
        assert!(matches!(
            state.process_frame(frame(0)).await,
            Err(SessionError::Busy)
        ));
    }

    #[tokio::test]
    async fn test_invalid_frame_data() {
        let state = state(10).await;
        state.start_session(CaptureMode::Image).unwrap();

        let mut bad = frame(0);
        bad.data = "not base64!".to_string();
        assert!(matches!(
            state.process_frame(bad).await,
            Err(SessionError::InvalidFrame(_))
        ));

        // The busy flag is released after a failed frame
        assert!(state.process_frame(frame(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_end_session_clears_plates() {
        let state = state(10).await;
        state.start_session(CaptureMode::Video).unwrap();
        state.process_frame(frame(0)).await.unwrap();

        let info = state.end_session().unwrap();
        assert!(info.mode.is_none());
        assert!(state.best_detections(10).unwrap().is_empty());
        assert!(state.clusters().unwrap().is_empty());
    }
}
