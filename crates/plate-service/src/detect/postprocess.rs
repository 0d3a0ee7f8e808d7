//! Turns raw detector rows into validated, rescaled, de-duplicated plate boxes.

use super::geometry::iou;
use super::{RawDetections, MIN_ROW_STRIDE};
use crate::config::DetectionConfig;
use common::plates::{Detection, Rectangle};
use image::DynamicImage;
use std::sync::Arc;
use thiserror::Error;

const COL_CLASS: usize = 0;
const COL_X1: usize = 1;
const COL_Y1: usize = 2;
const COL_X2: usize = 3;
const COL_Y2: usize = 4;
const COL_CONFIDENCE: usize = 6;

#[derive(Debug, Error, PartialEq)]
pub enum PostprocessError {
    #[error("detection row stride {stride} is shorter than the 7 required columns")]
    StrideTooShort { stride: usize },

    #[error("detection buffer of {len} values is not a multiple of row stride {stride}")]
    RaggedBuffer { len: usize, stride: usize },

    #[error("detection row {row} contains a non-finite value")]
    NonFinite { row: usize },

    #[error("image dimensions must be positive, got {width}x{height}")]
    EmptyImage { width: u32, height: u32 },
}

pub struct BoxPostProcessor {
    config: DetectionConfig,
}

impl BoxPostProcessor {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Parse every row into a model-space detection, unfiltered.
    pub fn parse_rows(&self, raw: &RawDetections) -> Result<Vec<Detection>, PostprocessError> {
        if raw.stride < MIN_ROW_STRIDE {
            return Err(PostprocessError::StrideTooShort { stride: raw.stride });
        }
        if raw.data.len() % raw.stride != 0 {
            return Err(PostprocessError::RaggedBuffer {
                len: raw.data.len(),
                stride: raw.stride,
            });
        }

        raw.data
            .chunks_exact(raw.stride)
            .enumerate()
            .map(|(row, values)| {
                let used = [
                    values[COL_CLASS],
                    values[COL_X1],
                    values[COL_Y1],
                    values[COL_X2],
                    values[COL_Y2],
                    values[COL_CONFIDENCE],
                ];
                if used.iter().any(|v| !v.is_finite()) {
                    return Err(PostprocessError::NonFinite { row });
                }

                let rect = Rectangle::new(
                    values[COL_X1],
                    values[COL_Y1],
                    values[COL_X2],
                    values[COL_Y2],
                );
                let label = self.class_name(values[COL_CLASS]);
                Ok(Detection::new(rect, label, values[COL_CONFIDENCE]))
            })
            .collect()
    }

    /// Filter, rescale to image space, clamp, drop degenerate boxes and suppress overlaps.
    pub fn process(
        &self,
        raw: &RawDetections,
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<Detection>, PostprocessError> {
        if image_width == 0 || image_height == 0 {
            return Err(PostprocessError::EmptyImage {
                width: image_width,
                height: image_height,
            });
        }

        let parsed = self.parse_rows(raw)?;
        let parsed_count = parsed.len();

        let model_size = self.config.model_input_size as f32;
        let width = image_width as f32;
        let height = image_height as f32;
        let scale_x = width / model_size;
        let scale_y = height / model_size;

        let boxes: Vec<Detection> = parsed
            .into_iter()
            .filter(|det| det.confidence > self.config.confidence_threshold)
            .map(|det| {
                let rect = Rectangle::new(
                    (det.rect.x1 * scale_x).clamp(0.0, width),
                    (det.rect.y1 * scale_y).clamp(0.0, height),
                    (det.rect.x2 * scale_x).clamp(0.0, width),
                    (det.rect.y2 * scale_y).clamp(0.0, height),
                );
                Detection { rect, ..det }
            })
            .filter(|det| det.rect.has_extent() && det.rect.area > self.config.min_box_area)
            .collect();

        let kept = self.nms(boxes);

        tracing::debug!(
            rows = parsed_count,
            kept = kept.len(),
            image_width,
            image_height,
            "post-processed detector output"
        );

        Ok(kept)
    }

    /// [`process`](Self::process) against a decoded frame, attaching a crop to each survivor.
    pub fn process_image(
        &self,
        raw: &RawDetections,
        image: &DynamicImage,
    ) -> Result<Vec<Detection>, PostprocessError> {
        let mut detections = self.process(raw, image.width(), image.height())?;
        for detection in &mut detections {
            detection.crop = Some(Arc::new(crop_region(image, &detection.rect)));
        }
        Ok(detections)
    }

    /// Label-scoped Non-Maximum Suppression.
    ///
    /// The most confident remaining box is kept and every remaining box with
    /// the same label and an IoU at or above the threshold is dropped. Boxes
    /// with different labels never suppress each other.
    pub fn nms(&self, boxes: Vec<Detection>) -> Vec<Detection> {
        if boxes.is_empty() {
            return vec![];
        }

        let mut sorted_boxes = boxes;
        sorted_boxes.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut keep = Vec::new();

        while !sorted_boxes.is_empty() {
            let current = sorted_boxes.remove(0);

            sorted_boxes.retain(|candidate| {
                candidate.label != current.label
                    || iou(&current.rect, &candidate.rect) < self.config.iou_threshold
            });

            keep.push(current);
        }

        keep
    }

    fn class_name(&self, class_id: f32) -> String {
        let class_idx = class_id.round();
        if class_idx >= 0.0 && (class_idx as usize) < self.config.class_names.len() {
            self.config.class_names[class_idx as usize].clone()
        } else {
            format!("class_{}", class_idx as i64)
        }
    }
}

/// Crop the pixel region under `rect`, rounding to whole pixels.
pub fn crop_region(image: &DynamicImage, rect: &Rectangle) -> DynamicImage {
    let x = rect.x1.round().max(0.0) as u32;
    let y = rect.y1.round().max(0.0) as u32;
    let width = rect.width().round().max(0.0) as u32;
    let height = rect.height().round().max(0.0) as u32;
    image.crop_imm(x, y, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> BoxPostProcessor {
        BoxPostProcessor::new(DetectionConfig {
            class_names: vec!["license_plate".to_string(), "vehicle".to_string()],
            ..DetectionConfig::default()
        })
    }

    fn det(label: &str, x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Detection {
        Detection::new(Rectangle::new(x1, y1, x2, y2), label, confidence)
    }

    #[test]
    fn test_parse_rows_maps_columns() {
        let raw = RawDetections::new(
            vec![
                1.0, 10.0, 20.0, 30.0, 40.0, 99.0, 0.8, // vehicle
                0.2, 1.0, 2.0, 3.0, 4.0, 99.0, 0.9, // rounds to class 0
                5.0, 1.0, 2.0, 3.0, 4.0, 99.0, 0.7, // unknown class
            ],
            7,
        );
        let rows = processor().parse_rows(&raw).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].label, "vehicle");
        assert_eq!(rows[0].rect, Rectangle::new(10.0, 20.0, 30.0, 40.0));
        assert_eq!(rows[0].confidence, 0.8);
        assert_eq!(rows[1].label, "license_plate");
        assert_eq!(rows[2].label, "class_5");
    }

    #[test]
    fn test_parse_rows_accepts_wider_stride() {
        let raw = RawDetections::new(vec![0.0, 1.0, 2.0, 30.0, 40.0, 0.0, 0.9, 7.0, 8.0], 9);
        let rows = processor().parse_rows(&raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].confidence, 0.9);
    }

    #[test]
    fn test_parse_rows_rejects_malformed_buffers() {
        let p = processor();
        assert_eq!(
            p.parse_rows(&RawDetections::new(vec![0.0; 12], 6))
                .unwrap_err(),
            PostprocessError::StrideTooShort { stride: 6 }
        );
        assert_eq!(
            p.parse_rows(&RawDetections::new(vec![0.0; 10], 7))
                .unwrap_err(),
            PostprocessError::RaggedBuffer { len: 10, stride: 7 }
        );
        let mut data = vec![0.0; 14];
        data[13] = f32::NAN;
        assert_eq!(
            p.parse_rows(&RawDetections::new(data, 7)).unwrap_err(),
            PostprocessError::NonFinite { row: 1 }
        );
    }

    #[test]
    fn test_process_rescales_and_clamps() {
        // 384x384 model space onto a 768x192 image
        let raw = RawDetections::from_rows(&[
            [0.0, 96.0, 96.0, 192.0, 192.0, 0.9],
            [0.0, 300.0, -20.0, 400.0, 100.0, 0.8],
        ]);
        let boxes = processor().process(&raw, 768, 192).unwrap();

        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].rect, Rectangle::new(192.0, 48.0, 384.0, 96.0));
        assert_eq!(boxes[1].rect, Rectangle::new(600.0, 0.0, 768.0, 50.0));
    }

    #[test]
    fn test_process_filters_confidence_and_small_boxes() {
        let raw = RawDetections::from_rows(&[
            [0.0, 0.0, 0.0, 100.0, 50.0, 0.6],  // not strictly above 0.6
            [0.0, 0.0, 0.0, 100.0, 50.0, 0.61], // kept
            [0.0, 200.0, 200.0, 205.0, 205.0, 0.9], // area 25, dropped
            [0.0, 300.0, 300.0, 290.0, 310.0, 0.9], // inverted x, dropped
        ]);
        let boxes = processor().process(&raw, 384, 384).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].confidence, 0.61);
    }

    #[test]
    fn test_process_empty_buffer() {
        let boxes = processor()
            .process(&RawDetections::new(vec![], 7), 640, 480)
            .unwrap();
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_process_rejects_empty_image() {
        let raw = RawDetections::from_rows(&[[0.0, 0.0, 0.0, 10.0, 10.0, 0.9]]);
        assert_eq!(
            processor().process(&raw, 0, 480).unwrap_err(),
            PostprocessError::EmptyImage {
                width: 0,
                height: 480
            }
        );
    }

    #[test]
    fn test_nms() {
        let boxes = vec![
            det("license_plate", 10.0, 10.0, 110.0, 40.0, 0.9),
            det("license_plate", 15.0, 12.0, 115.0, 42.0, 0.8),
            det("license_plate", 200.0, 200.0, 300.0, 230.0, 0.85),
        ];

        let filtered = processor().nms(boxes);
        // Highest confidence from the overlapping pair plus the separate box
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].confidence, 0.9);
        assert_eq!(filtered[1].confidence, 0.85);
    }

    #[test]
    fn test_nms_keeps_different_labels_with_full_overlap() {
        let boxes = vec![
            det("license_plate", 10.0, 10.0, 110.0, 40.0, 0.9),
            det("vehicle", 10.0, 10.0, 110.0, 40.0, 0.8),
        ];

        let filtered = processor().nms(boxes);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_nms_threshold_is_inclusive() {
        // IoU of exactly 0.75 with the keeper
        let boxes = vec![
            det("license_plate", 0.0, 0.0, 100.0, 100.0, 0.9),
            det("license_plate", 0.0, 0.0, 100.0, 75.0, 0.8),
        ];
        assert_eq!(processor().nms(boxes).len(), 1);

        // IoU just below 0.7 survives
        let boxes = vec![
            det("license_plate", 0.0, 0.0, 100.0, 100.0, 0.9),
            det("license_plate", 0.0, 0.0, 100.0, 69.0, 0.8),
        ];
        assert_eq!(processor().nms(boxes).len(), 2);
    }

    #[test]
    fn test_nms_idempotent_and_no_same_label_overlap() {
        let p = processor();
        let boxes = vec![
            det("license_plate", 0.0, 0.0, 50.0, 20.0, 0.7),
            det("license_plate", 2.0, 1.0, 52.0, 21.0, 0.95),
            det("vehicle", 0.0, 0.0, 50.0, 20.0, 0.65),
            det("license_plate", 100.0, 0.0, 150.0, 20.0, 0.8),
            det("license_plate", 101.0, 0.0, 151.0, 20.0, 0.75),
        ];

        let once = p.nms(boxes);
        for (i, a) in once.iter().enumerate() {
            for b in once.iter().skip(i + 1) {
                assert!(a.label != b.label || iou(&a.rect, &b.rect) < 0.7);
            }
        }

        let twice = p.nms(once.clone());
        let key = |d: &Detection| (d.label.clone(), d.rect.x1 as i32, d.rect.y1 as i32);
        assert_eq!(
            once.iter().map(key).collect::<Vec<_>>(),
            twice.iter().map(key).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_process_image_attaches_crops() {
        let image = DynamicImage::new_rgb8(768, 384);
        let raw = RawDetections::from_rows(&[[0.0, 96.0, 96.0, 192.0, 144.0, 0.9]]);

        let boxes = processor().process_image(&raw, &image).unwrap();
        assert_eq!(boxes.len(), 1);

        let crop = boxes[0].crop.as_ref().unwrap();
        assert_eq!(crop.width(), 192);
        assert_eq!(crop.height(), 48);
    }
}
