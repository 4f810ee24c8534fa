//! One-shot detection on a clicked image.
//!
use std::sync::Arc;

use common::RunningMode;

use crate::{
    detector::DetectorHandle,
    error::DetectError,
    overlay::{render_image_detections, OverlayElement},
    surface::ImageTarget,
};

/// What became of a click once its detection finished.
#[derive(Debug, PartialEq)]
pub enum ClickOutcome {
    /// The overlays are now shown on the image.
    Rendered(Vec<OverlayElement>),
    /// A later click on the same image invalidated this one.
    Superseded,
}

pub struct ImagePipeline {
    detector: Arc<DetectorHandle>,
}

impl ImagePipeline {
    pub fn new(detector: Arc<DetectorHandle>) -> Self {
        Self { detector }
    }

    /// Handle a click on `target`.
    ///
    /// `displayed` is the size the image is shown at, `None` means its natural size.
    /// The previous overlays of the image are removed even when the detector is not
    /// ready yet.
    pub async fn on_click(
        &self,
        target: &ImageTarget,
        displayed: Option<(f32, f32)>,
    ) -> Result<ClickOutcome, DetectError> {
        let generation = target.begin();

        let detector = self.detector.get(RunningMode::Image)?;
        let pixels = target.pixels();
        let result = tokio::task::spawn_blocking(move || detector.detect(&pixels))
            .await
            .map_err(|err| DetectError::Inference(err.into()))??;

        let geometry = match displayed {
            Some((width, height)) if width > 0.0 && height > 0.0 => target.geometry(width, height),
            _ => {
                let (width, height) = target.natural_size();
                target.geometry(width as f32, height as f32)
            }
        };
        let overlays = render_image_detections(&result, &geometry);
        log::debug!(
            "{}: {} detections at ratio {}",
            target.name(),
            result.len(),
            geometry.ratio()
        );

        if target.commit(generation, overlays.clone()) {
            Ok(ClickOutcome::Rendered(overlays))
        } else {
            log::debug!("{}: dropping superseded detection", target.name());
            Ok(ClickOutcome::Superseded)
        }
    }
}
