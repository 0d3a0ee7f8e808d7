//! Soft, additive acceptance gate for decoded plates.

use crate::config::QualityConfig;
use common::plates::DecodedPlate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

const LENGTH_WEIGHT: f64 = 0.20;
const MEAN_CONFIDENCE_WEIGHT: f64 = 0.30;
const WORST_CHARACTER_WEIGHT: f64 = 0.25;
const FORMAT_WEIGHT: f64 = 0.25;

/// Absorbs rounding in sums such as 0.2 + 0.25 + 0.25
const SCORE_TOLERANCE: f64 = 1e-9;

/// 2-4 alphanumerics, optional space or hyphen, 2-4 alphanumerics
static PLATE_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[A-Z0-9]{2,4}[\s-]?[A-Z0-9]{2,4}$").expect("plate format pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    Length,
    LowMeanConfidence,
    WeakCharacter,
    Format,
}

impl fmt::Display for QualityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Length => "text length out of range",
            Self::LowMeanConfidence => "low overall confidence",
            Self::WeakCharacter => "character with very low confidence",
            Self::Format => "inconsistent plate format",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub score: f64,
    pub accepted: bool,

    /// Unsatisfied criteria; diagnostics only
    pub issues: Vec<QualityIssue>,
}

pub struct QualityEvaluator {
    config: QualityConfig,
}

impl QualityEvaluator {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Score a decoded plate. `mean_confidence` is the untrimmed slot mean.
    pub fn evaluate(&self, plate: &DecodedPlate, mean_confidence: f32) -> QualityReport {
        let length = plate.text.chars().count();
        let min_char_confidence = plate
            .confidence
            .iter()
            .copied()
            .reduce(f32::min)
            .unwrap_or(f32::INFINITY);

        let criteria = [
            (
                (self.config.min_length..=self.config.max_length).contains(&length),
                LENGTH_WEIGHT,
                QualityIssue::Length,
            ),
            (
                mean_confidence >= self.config.min_mean_confidence,
                MEAN_CONFIDENCE_WEIGHT,
                QualityIssue::LowMeanConfidence,
            ),
            (
                min_char_confidence >= self.config.min_char_confidence,
                WORST_CHARACTER_WEIGHT,
                QualityIssue::WeakCharacter,
            ),
            (
                PLATE_FORMAT.is_match(plate.text.trim()),
                FORMAT_WEIGHT,
                QualityIssue::Format,
            ),
        ];

        let mut score = 0.0;
        let mut issues = Vec::new();
        for (satisfied, weight, issue) in criteria {
            if satisfied {
                score += weight;
            } else {
                issues.push(issue);
            }
        }

        QualityReport {
            score,
            accepted: score + SCORE_TOLERANCE >= self.config.accept_threshold,
            issues,
        }
    }
}
