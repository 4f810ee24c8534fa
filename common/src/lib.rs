//! Data model shared between the detector backends and the demo server.
pub mod detection;
pub mod mode;

pub use detection::{BoundingBox, Category, Detection, DetectionResult};
pub use mode::{Delegate, RunningMode};
