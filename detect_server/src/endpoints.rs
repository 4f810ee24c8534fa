//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::{Path, Query},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use futures::{future, stream::StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    capture::CaptureState,
    context::AppContext,
    detector::DetectorState,
    error::{CaptureError, DetectError},
    image_pipeline::ClickOutcome,
    overlay,
    page,
};

/// Build the router with all endpoints of the demo.
pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/images/:name", get(image_file))
        .route("/images/:name/detect", post(detect_image))
        .route("/images/:name/overlays", get(image_overlays))
        .route("/webcam/enable", post(enable_webcam))
        .route("/webcam/disable", post(disable_webcam))
        .route("/live_view", get(live_view))
        .route("/video_stream", get(video_stream))
        .layer(Extension(context))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Demo page.
pub async fn index(Extension(context): Extension<Arc<AppContext>>) -> Html<String> {
    Html(page::render(&context))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub detector: &'static str,
    pub running_mode: Option<String>,
    pub error: Option<String>,
    pub capture: CaptureState,
    pub capture_available: bool,
}

pub async fn status(Extension(context): Extension<Arc<AppContext>>) -> Json<StatusResponse> {
    let (detector, running_mode, error) = match context.detector.state() {
        DetectorState::Loading => ("loading", None, None),
        DetectorState::Ready(mode) => ("ready", Some(mode.to_string()), None),
        DetectorState::Failed(reason) => ("failed", None, Some(reason)),
    };

    Json(StatusResponse {
        detector,
        running_mode,
        error,
        capture: context.capture.state(),
        capture_available: context.capture.is_available(),
    })
}

pub async fn image_file(
    Extension(context): Extension<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    let Some(target) = context.surface.image(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(target.path()).await {
        Ok(data) => ([(header::CONTENT_TYPE, content_type(&name))], data).into_response(),
        Err(err) => {
            log::warn!("Failed to read {}: {err}", target.path().display());
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Size the clicked image is displayed at.
#[derive(Debug, Deserialize)]
pub struct DisplayParams {
    #[serde(default)]
    width: Option<f32>,
    #[serde(default)]
    height: Option<f32>,
}

/// Run a detection on a clicked image, answers with the overlay markup.
///
/// A click overtaken by a later one on the same image answers with no content.
pub async fn detect_image(
    Extension(context): Extension<Arc<AppContext>>,
    Path(name): Path<String>,
    Query(params): Query<DisplayParams>,
) -> Response {
    let Some(target) = context.surface.image(&name) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let displayed = params.width.zip(params.height);
    match context.images.on_click(&target, displayed).await {
        Ok(ClickOutcome::Rendered(overlays)) => Html(overlay::to_html(&overlays)).into_response(),
        Ok(ClickOutcome::Superseded) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn image_overlays(
    Extension(context): Extension<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    match context.surface.image(&name) {
        Some(target) => Html(overlay::to_html(&target.overlays())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn enable_webcam(Extension(context): Extension<Arc<AppContext>>) -> Response {
    match context.capture.enable().await {
        Ok(()) => Json(context.capture.state()).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn disable_webcam(Extension(context): Extension<Arc<AppContext>>) -> Response {
    context.capture.disable().await;
    Json(context.capture.state()).into_response()
}

/// Current content of the live view container.
pub async fn live_view(Extension(context): Extension<Arc<AppContext>>) -> Html<String> {
    Html(overlay::to_html(&context.surface.live_view().overlays()))
}

/// Annotated webcam frames as multipart JPEG stream.
pub async fn video_stream(Extension(context): Extension<Arc<AppContext>>) -> impl IntoResponse {
    let stream = BroadcastStream::new(context.capture.subscribe_frames())
        // Lagging viewers skip frames
        .filter_map(|item| future::ready(item.ok()))
        .map(Ok::<_, std::io::Error>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

fn detect_status(err: &DetectError) -> StatusCode {
    match err {
        DetectError::NotReady => StatusCode::CONFLICT,
        DetectError::ModeMismatch { .. } | DetectError::NonMonotonicTimestamp { .. } => {
            StatusCode::BAD_REQUEST
        }
        DetectError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        if let DetectError::Inference(err) = &self {
            log::warn!("Detection failed: {err:#}");
        }
        (detect_status(&self), self.to_string()).into_response()
    }
}

impl IntoResponse for CaptureError {
    fn into_response(self) -> Response {
        let status = match &self {
            CaptureError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            CaptureError::AlreadyCapturing => StatusCode::CONFLICT,
            CaptureError::Detector(err) => detect_status(err),
            CaptureError::Acquire(_) | CaptureError::Frame(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type("cat.JPG"), "image/jpeg");
        assert_eq!(content_type("dog.png"), "image/png");
        assert_eq!(content_type("README"), "application/octet-stream");
    }

    #[test]
    fn not_ready_maps_to_conflict() {
        assert_eq!(
            DetectError::NotReady.into_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CaptureError::Detector(DetectError::NotReady)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CaptureError::Unavailable.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
