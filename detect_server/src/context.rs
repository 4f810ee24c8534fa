//! Application context shared by all request handlers.
//!
use std::sync::Arc;

use crate::{
    capture::{CaptureConfig, CapturePipeline},
    detector::DetectorHandle,
    image_pipeline::ImagePipeline,
    sensors::CaptureDevice,
    surface::Surface,
};

/// Handles to the detector and both pipelines, built once at startup.
pub struct AppContext {
    pub detector: Arc<DetectorHandle>,
    pub surface: Arc<Surface>,
    pub images: ImagePipeline,
    pub capture: Arc<CapturePipeline>,
}

impl AppContext {
    pub fn new(
        detector: Arc<DetectorHandle>,
        surface: Surface,
        device: Arc<dyn CaptureDevice>,
        capture_config: CaptureConfig,
    ) -> Self {
        let surface = Arc::new(surface);
        let images = ImagePipeline::new(Arc::clone(&detector));
        let capture = Arc::new(CapturePipeline::new(
            Arc::clone(&detector),
            device,
            Arc::clone(surface.live_view()),
            capture_config,
        ));

        Self {
            detector,
            surface,
            images,
            capture,
        }
    }
}
