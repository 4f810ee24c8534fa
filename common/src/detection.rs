//! Detection results as produced by an object detector.
//!
use serde::{Deserialize, Serialize};

/// One ranked classification of a detected object.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub index: i32,
    pub score: f32,
    pub category_name: String,
    #[serde(default)]
    pub display_name: String,
}

impl Category {
    pub fn new(index: i32, score: f32, category_name: impl Into<String>) -> Self {
        Self {
            index,
            score,
            category_name: category_name.into(),
            display_name: String::new(),
        }
    }
}

/// Axis-aligned box in the pixel space of the source image or frame.
///
/// The origin is the top-left corner.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(origin_x: f32, origin_y: f32, width: f32, height: f32) -> Self {
        Self {
            origin_x,
            origin_y,
            width,
            height,
        }
    }

    /// Build a box from top-left and bottom-right corner points.
    ///
    /// Corners in the wrong order yield an empty box instead of a negative size.
    pub fn from_corners(x_tl: f32, y_tl: f32, x_br: f32, y_br: f32) -> Self {
        Self {
            origin_x: x_tl,
            origin_y: y_tl,
            width: f32::max(x_br - x_tl, 0.0),
            height: f32::max(y_br - y_tl, 0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// One recognized object instance.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Categories ranked by descending score.
    pub categories: Vec<Category>,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(categories: Vec<Category>, bounding_box: BoundingBox) -> Self {
        Self {
            categories,
            bounding_box,
        }
    }

    /// The highest ranked category, the only one shown to the user.
    pub fn top_category(&self) -> Option<&Category> {
        self.categories.first()
    }
}

/// All detections of a single inference call, in detector order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }
}
