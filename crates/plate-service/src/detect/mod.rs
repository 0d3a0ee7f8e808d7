pub mod geometry;
pub mod postprocess;

pub use postprocess::{BoxPostProcessor, PostprocessError};

/// Columns every detector row must carry: class id, x1, y1, x2, y2, unused, confidence
pub const MIN_ROW_STRIDE: usize = 7;

/// Raw detector output: `data.len() / stride` rows in model-space coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDetections {
    pub data: Vec<f32>,
    pub stride: usize,
}

impl RawDetections {
    pub fn new(data: Vec<f32>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Build a buffer from `[class_id, x1, y1, x2, y2, confidence]` tuples.
    pub fn from_rows(rows: &[[f32; 6]]) -> Self {
        let data = rows
            .iter()
            .flat_map(|[class_id, x1, y1, x2, y2, confidence]| {
                [*class_id, *x1, *y1, *x2, *y2, 0.0, *confidence]
            })
            .collect();
        Self::new(data, MIN_ROW_STRIDE)
    }

    pub fn row_count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
