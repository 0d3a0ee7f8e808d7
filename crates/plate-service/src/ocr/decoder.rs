//! Per-slot arg-max decoding of fixed-length recognizer output.
//!
//! The recognizer emits `max_slots` rows of `alphabet.len()` scores. Each
//! row independently yields its best character and that character's score;
//! there is no sequence model, blank symbol or repeat collapsing.

use crate::config::OcrConfig;
use common::plates::DecodedPlate;
use ndarray::ArrayView2;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error(
        "recognizer output has {actual} values, expected {expected} ({slots} slots x {alphabet} characters)"
    )]
    SizeMismatch {
        expected: usize,
        actual: usize,
        slots: usize,
        alphabet: usize,
    },

    #[error("recognizer output contains a non-finite value in slot {slot}")]
    NonFinite { slot: usize },

    #[error("recognizer layout needs at least one slot and one character")]
    EmptyLayout,
}

#[derive(Debug, Clone)]
pub struct TextDecoder {
    max_slots: usize,
    alphabet: Vec<char>,
    pad_char: char,
}

impl TextDecoder {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            max_slots: config.max_slots,
            alphabet: config.alphabet_chars(),
            pad_char: config.pad_char,
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn alphabet(&self) -> &[char] {
        &self.alphabet
    }

    pub fn pad_char(&self) -> char {
        self.pad_char
    }

    /// Number of values a recognizer output must contain
    pub fn expected_len(&self) -> usize {
        self.max_slots * self.alphabet.len()
    }

    /// Decode a flat `max_slots x alphabet` buffer into text and per-slot confidence.
    pub fn decode(&self, output: &[f32]) -> Result<DecodedPlate, DecodeError> {
        if self.max_slots == 0 || self.alphabet.is_empty() {
            return Err(DecodeError::EmptyLayout);
        }

        let size_mismatch = || DecodeError::SizeMismatch {
            expected: self.expected_len(),
            actual: output.len(),
            slots: self.max_slots,
            alphabet: self.alphabet.len(),
        };
        if output.len() != self.expected_len() {
            return Err(size_mismatch());
        }

        let predictions = ArrayView2::from_shape((self.max_slots, self.alphabet.len()), output)
            .map_err(|_| size_mismatch())?;

        let mut raw_text = String::with_capacity(self.max_slots);
        let mut confidence = Vec::with_capacity(self.max_slots);

        for (slot, scores) in predictions.outer_iter().enumerate() {
            if scores.iter().any(|v| !v.is_finite()) {
                return Err(DecodeError::NonFinite { slot });
            }

            // First index wins ties
            let mut max_idx = 0;
            let mut max_prob = scores[0];
            for (idx, &prob) in scores.iter().enumerate().skip(1) {
                if prob > max_prob {
                    max_prob = prob;
                    max_idx = idx;
                }
            }

            raw_text.push(self.alphabet[max_idx]);
            confidence.push(max_prob);
        }

        Ok(DecodedPlate {
            text: clean_plate_text(&raw_text, self.pad_char),
            confidence,
        })
    }
}

/// Strip the trailing run of `pad_char`; interior pad characters are kept.
pub fn clean_plate_text(text: &str, pad_char: char) -> String {
    text.trim_end_matches(pad_char).to_string()
}
