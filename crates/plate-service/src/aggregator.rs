//! Session-scoped store of accepted plate readings.
//!
//! Readings are grouped into clusters of textually similar spellings so that
//! OCR slips ("AB1Z34" for "AB1234") count towards the same plate. In live
//! capture the aggregator also counts consecutive identical readings and
//! reports when a plate has been confirmed often enough to stop capturing.
//!
//! Clusters are matched first-match in creation order, not best-match: a
//! reading joins the oldest cluster whose representative is similar enough,
//! even if a younger cluster is closer. Insertion order can therefore change
//! the grouping.

use crate::config::AggregatorConfig;
use crate::similarity::similarity;
use common::plates::{
    AggregatorStats, CaptureMode, ClusterSnapshot, PlateCandidate, PlateRecord, VariantCount,
};
use common::validation::safe_unix_timestamp_millis;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("plate confidence must be a finite value in [0, 1], got {0}")]
    InvalidConfidence(f32),

    #[error("plate text cannot be empty")]
    EmptyText,
}

/// Result of submitting one reading
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// The reading was stored and clustered
    Inserted(PlateRecord),

    /// Live capture confirmed `text`; the reading was not stored
    Stop { text: String, consecutive: u32 },
}

impl SubmitOutcome {
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop { .. })
    }

    pub fn record(&self) -> Option<&PlateRecord> {
        match self {
            Self::Inserted(record) => Some(record),
            Self::Stop { .. } => None,
        }
    }
}

struct PlateCluster {
    id: u64,
    representative_text: String,
    total_occurrences: u32,
    members: Vec<Arc<PlateRecord>>,
    /// First-seen order
    variant_counts: Vec<VariantCount>,
}

impl PlateCluster {
    fn new(id: u64, record: Arc<PlateRecord>) -> Self {
        Self {
            id,
            representative_text: record.text.clone(),
            total_occurrences: 1,
            variant_counts: vec![VariantCount {
                text: record.text.clone(),
                occurrences: 1,
            }],
            members: vec![record],
        }
    }

    /// Add a member and promote its spelling if it now strictly outnumbers
    /// the representative. Returns true on promotion.
    fn absorb(&mut self, record: Arc<PlateRecord>) -> bool {
        match self
            .variant_counts
            .iter_mut()
            .find(|variant| variant.text == record.text)
        {
            Some(variant) => variant.occurrences += 1,
            None => self.variant_counts.push(VariantCount {
                text: record.text.clone(),
                occurrences: 1,
            }),
        }
        self.members.push(record);
        self.total_occurrences += 1;

        let incumbent = self.variant_count(&self.representative_text);
        let leader = self
            .variant_counts
            .iter()
            .reduce(|best, variant| {
                if variant.occurrences > best.occurrences {
                    variant
                } else {
                    best
                }
            })
            .filter(|leader| leader.occurrences > incumbent)
            .map(|leader| leader.text.clone());

        match leader {
            Some(text) => {
                self.representative_text = text;
                true
            }
            None => false,
        }
    }

    fn variant_count(&self, text: &str) -> u32 {
        self.variant_counts
            .iter()
            .find(|variant| variant.text == text)
            .map_or(0, |variant| variant.occurrences)
    }

    fn mean_confidence(&self) -> f32 {
        if self.members.is_empty() {
            return 0.0;
        }
        self.members.iter().map(|m| m.mean_confidence).sum::<f32>() / self.members.len() as f32
    }

    /// Most confident member; the earliest wins ties.
    fn best_member(&self) -> Option<&Arc<PlateRecord>> {
        self.members.iter().reduce(|best, member| {
            if member.mean_confidence > best.mean_confidence {
                member
            } else {
                best
            }
        })
    }

    fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            id: self.id,
            representative_text: self.representative_text.clone(),
            total_occurrences: self.total_occurrences,
            mean_confidence: self.mean_confidence(),
            variants: self.variant_counts.clone(),
            member_ids: self.members.iter().map(|m| m.id.clone()).collect(),
        }
    }
}

#[derive(Default)]
struct ConsecutiveState {
    count: u32,
    last_seen_ms: Option<u64>,
    window: Vec<Arc<PlateRecord>>,
}

pub struct DetectionAggregator {
    config: AggregatorConfig,
    /// Creation order; promotion never reorders
    clusters: Vec<PlateCluster>,
    history: Vec<Arc<PlateRecord>>,
    consecutive: HashMap<String, ConsecutiveState>,
    next_cluster_id: u64,
    stats: AggregatorStats,
}

impl DetectionAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            clusters: Vec::new(),
            history: Vec::new(),
            consecutive: HashMap::new(),
            next_cluster_id: 1,
            stats: AggregatorStats::default(),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Submit a reading stamped with the current wall clock.
    pub fn submit(
        &mut self,
        candidate: PlateCandidate,
        mode: CaptureMode,
    ) -> Result<SubmitOutcome, AggregateError> {
        self.submit_at(candidate, mode, safe_unix_timestamp_millis())
    }

    /// Submit a reading observed at `now_ms` (Unix milliseconds).
    pub fn submit_at(
        &mut self,
        candidate: PlateCandidate,
        mode: CaptureMode,
        now_ms: u64,
    ) -> Result<SubmitOutcome, AggregateError> {
        let confidence = candidate.mean_confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(AggregateError::InvalidConfidence(confidence));
        }
        if candidate.text.is_empty() {
            return Err(AggregateError::EmptyText);
        }

        let record = Arc::new(PlateRecord {
            id: uuid::Uuid::new_v4().to_string(),
            text: candidate.text,
            mean_confidence: confidence,
            timestamp_ms: now_ms,
            rect: candidate.rect,
            decoded: candidate.decoded,
            occurrences: 1,
            crop: candidate.crop,
        });

        if mode == CaptureMode::LiveCapture {
            if let Some(consecutive) = self.track_consecutive(&record, now_ms) {
                info!(
                    text = %record.text,
                    consecutive,
                    "plate confirmed by consecutive readings, stopping capture"
                );
                return Ok(SubmitOutcome::Stop {
                    text: record.text.clone(),
                    consecutive,
                });
            }
        }

        self.history.push(Arc::clone(&record));
        self.cluster(Arc::clone(&record));
        self.stats = AggregatorStats {
            total_records: self.history.len(),
            unique_plates: self.clusters.len(),
        };

        Ok(SubmitOutcome::Inserted(PlateRecord::clone(&record)))
    }

    /// Update the consecutive counter; `Some(count)` once the threshold is reached.
    fn track_consecutive(&mut self, record: &Arc<PlateRecord>, now_ms: u64) -> Option<u32> {
        let timeout_ms = self.config.consecutive_timeout_ms;
        let state = self.consecutive.entry(record.text.clone()).or_default();

        if let Some(last_seen_ms) = state.last_seen_ms {
            if now_ms.saturating_sub(last_seen_ms) > timeout_ms {
                debug!(
                    text = %record.text,
                    gap_ms = now_ms.saturating_sub(last_seen_ms),
                    "consecutive streak expired"
                );
                state.count = 0;
                state.window.clear();
            }
        }

        state.count += 1;
        state.last_seen_ms = Some(now_ms);
        state.window.push(Arc::clone(record));

        (state.count >= self.config.consecutive_required).then_some(state.count)
    }

    fn cluster(&mut self, record: Arc<PlateRecord>) {
        let threshold = self.config.similarity_threshold;

        match self
            .clusters
            .iter_mut()
            .find(|cluster| similarity(&record.text, &cluster.representative_text) >= threshold)
        {
            Some(cluster) => {
                let previous = cluster.representative_text.clone();
                if cluster.absorb(record) {
                    info!(
                        cluster_id = cluster.id,
                        from = %previous,
                        to = %cluster.representative_text,
                        "promoted plate variant"
                    );
                } else {
                    debug!(
                        cluster_id = cluster.id,
                        representative = %cluster.representative_text,
                        total = cluster.total_occurrences,
                        "merged reading into cluster"
                    );
                }
            }
            None => {
                let id = self.next_cluster_id;
                self.next_cluster_id += 1;
                debug!(cluster_id = id, text = %record.text, "created plate cluster");
                self.clusters.push(PlateCluster::new(id, record));
            }
        }
    }

    /// Top `limit` clusters by occurrences then mean confidence, each
    /// represented by its most confident reading stamped with the cluster total.
    pub fn best_detections(&self, limit: usize) -> Vec<PlateRecord> {
        let mut ranked: Vec<&PlateCluster> = self.clusters.iter().collect();
        ranked.sort_by(|a, b| {
            b.total_occurrences.cmp(&a.total_occurrences).then_with(|| {
                b.mean_confidence()
                    .partial_cmp(&a.mean_confidence())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        ranked
            .into_iter()
            .filter_map(|cluster| {
                cluster.best_member().map(|member| PlateRecord {
                    occurrences: cluster.total_occurrences,
                    ..PlateRecord::clone(member)
                })
            })
            .take(limit)
            .collect()
    }

    /// [`best_detections`](Self::best_detections) with the configured default limit
    pub fn best_detections_default(&self) -> Vec<PlateRecord> {
        self.best_detections(self.config.best_limit)
    }

    pub fn record(&self, id: &str) -> Option<PlateRecord> {
        self.history
            .iter()
            .find(|record| record.id == id)
            .map(|record| PlateRecord::clone(record))
    }

    /// Every stored reading in submission order
    pub fn records(&self) -> Vec<PlateRecord> {
        self.history
            .iter()
            .map(|record| PlateRecord::clone(record))
            .collect()
    }

    pub fn clusters(&self) -> Vec<ClusterSnapshot> {
        self.clusters.iter().map(PlateCluster::snapshot).collect()
    }

    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Current live-capture streak for `text`, 0 if never seen
    pub fn consecutive_count(&self, text: &str) -> u32 {
        self.consecutive.get(text).map_or(0, |state| state.count)
    }

    /// Readings in the current live-capture streak for `text`
    pub fn consecutive_window(&self, text: &str) -> Vec<PlateRecord> {
        self.consecutive.get(text).map_or_else(Vec::new, |state| {
            state
                .window
                .iter()
                .map(|record| PlateRecord::clone(record))
                .collect()
        })
    }

    /// Drop every cluster, reading and streak.
    pub fn clear(&mut self) {
        self.clusters.clear();
        self.history.clear();
        self.consecutive.clear();
        self.next_cluster_id = 1;
        self.stats = AggregatorStats::default();
    }
}
