use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Frame Pipeline Metrics ====
    pub static ref PLATE_FRAMES_PROCESSED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_frames_processed_total",
                "Total number of frames submitted for plate recognition",
            ),
            &["mode", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "plate_inference_duration_seconds",
                "Time spent in detection and recognition per frame",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["engine"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_DETECTIONS_KEPT: IntCounter = {
        let metric = IntCounter::new(
            "plate_detections_kept_total",
            "Detections surviving confidence filtering and suppression",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_QUALITY_EVALUATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_quality_evaluations_total",
                "Decoded plates scored by the quality gate",
            ),
            &["result"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_DECODE_ERRORS: IntCounter = {
        let metric = IntCounter::new(
            "plate_decode_errors_total",
            "Recognizer outputs rejected as malformed",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Aggregator Metrics ====
    pub static ref PLATE_AGGREGATOR_SUBMISSIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "plate_aggregator_submissions_total",
                "Accepted plates submitted to the aggregator",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_UNIQUE_PLATES: IntGauge = {
        let metric = IntGauge::new(
            "plate_unique_plates",
            "Distinct plate clusters in the current session",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PLATE_CAPTURE_STOPS: IntCounter = {
        let metric = IntCounter::new(
            "plate_capture_stops_total",
            "Live captures stopped after repeated identical readings",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}
