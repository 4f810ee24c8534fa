mod support;

use std::sync::Arc;

use common::{DetectionResult, RunningMode};
use detect_server::{
    detector::DetectorState,
    error::DetectError,
    image_pipeline::{ClickOutcome, ImagePipeline},
    overlay::{render_image_detections, OverlayKind},
    surface::ImageTarget,
};
use image::RgbImage;
use support::*;

fn target() -> Arc<ImageTarget> {
    Arc::new(ImageTarget::new("cat.jpg", "cat.jpg", RgbImage::new(400, 200)))
}

#[tokio::test]
async fn click_renders_scaled_label_and_rect() -> anyhow::Result<()> {
    let handle = ready_handle(Arc::new(ScriptedModel::new(vec![cat()]))).await;
    let pipeline = ImagePipeline::new(handle);
    let target = target();

    let outcome = pipeline.on_click(&target, Some((200.0, 100.0))).await?;
    let ClickOutcome::Rendered(overlays) = outcome else {
        panic!("click was not rendered");
    };

    assert_eq!(overlays.len(), 2);
    let rect = &overlays[0];
    assert_eq!(rect.kind, OverlayKind::Highlighter);
    assert_eq!(
        (rect.left, rect.top, rect.width, rect.height),
        (5.0, 10.0, 50.0, Some(25.0))
    );
    let label = &overlays[1];
    assert_eq!(label.text.as_deref(), Some("cat - 92% confidence."));
    assert_eq!(label.width, 40.0);

    assert_eq!(target.overlays(), overlays);
    Ok(())
}

#[tokio::test]
async fn click_without_display_size_is_unscaled() -> anyhow::Result<()> {
    let handle = ready_handle(Arc::new(ScriptedModel::new(vec![cat()]))).await;
    let pipeline = ImagePipeline::new(handle);
    let target = target();

    pipeline.on_click(&target, None).await?;
    let overlays = target.overlays();
    assert_eq!((overlays[0].left, overlays[0].top), (10.0, 20.0));
    Ok(())
}

#[tokio::test]
async fn click_before_ready_clears_and_aborts() {
    let model = Arc::new(ScriptedModel::new(vec![cat()]));
    let handle = loading_handle(model.clone());
    let pipeline = ImagePipeline::new(handle);
    let target = target();

    // Overlays left from an earlier session
    let generation = target.begin();
    let stale = render_image_detections(&cat(), &target.geometry(400.0, 200.0));
    assert!(target.commit(generation, stale));
    assert_eq!(target.overlays().len(), 2);

    let result = pipeline.on_click(&target, Some((200.0, 100.0))).await;
    assert!(matches!(result, Err(DetectError::NotReady)));
    assert!(target.overlays().is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn sequential_clicks_keep_only_the_last_result() -> anyhow::Result<()> {
    let second = DetectionResult::new(vec![
        detection("dog", 0.8, (0.0, 0.0, 40.0, 40.0)),
        detection("ball", 0.6, (100.0, 100.0, 20.0, 20.0)),
    ]);
    let handle = ready_handle(Arc::new(ScriptedModel::new(vec![cat(), second]))).await;
    let pipeline = ImagePipeline::new(handle);
    let target = target();

    pipeline.on_click(&target, Some((400.0, 200.0))).await?;
    pipeline.on_click(&target, Some((400.0, 200.0))).await?;

    let texts: Vec<_> = target
        .overlays()
        .into_iter()
        .filter_map(|overlay| overlay.text)
        .collect();
    assert_eq!(texts, vec!["dog - 80% confidence.", "ball - 60% confidence."]);
    assert_eq!(target.overlays().len(), 4);
    Ok(())
}

#[tokio::test]
async fn zero_detections_remove_previous_overlays() -> anyhow::Result<()> {
    let handle = ready_handle(Arc::new(ScriptedModel::new(vec![
        cat(),
        DetectionResult::default(),
    ])))
    .await;
    let pipeline = ImagePipeline::new(handle);
    let target = target();

    pipeline.on_click(&target, None).await?;
    assert_eq!(target.overlays().len(), 2);

    let outcome = pipeline.on_click(&target, None).await?;
    assert_eq!(outcome, ClickOutcome::Rendered(vec![]));
    assert!(target.overlays().is_empty());
    Ok(())
}

#[tokio::test]
async fn slow_click_does_not_overwrite_newer_click() -> anyhow::Result<()> {
    let newer = DetectionResult::new(vec![detection("dog", 0.7, (1.0, 2.0, 30.0, 30.0))]);
    let (model, release) = GatedModel::new(cat(), newer);
    let entered = Arc::clone(&model.entered);
    let handle = ready_handle(Arc::new(model)).await;
    let pipeline = Arc::new(ImagePipeline::new(handle));
    let target = target();

    let slow = {
        let pipeline = Arc::clone(&pipeline);
        let target = Arc::clone(&target);
        tokio::spawn(async move { pipeline.on_click(&target, None).await })
    };
    entered.notified().await;

    let fast = pipeline.on_click(&target, None).await?;
    assert!(matches!(fast, ClickOutcome::Rendered(_)));

    release.send(())?;
    let slow = slow.await??;
    assert_eq!(slow, ClickOutcome::Superseded);

    let texts: Vec<_> = target
        .overlays()
        .into_iter()
        .filter_map(|overlay| overlay.text)
        .collect();
    assert_eq!(texts, vec!["dog - 70% confidence."]);
    Ok(())
}

#[tokio::test]
async fn click_switches_detector_to_image_mode() -> anyhow::Result<()> {
    let handle = ready_handle(Arc::new(ScriptedModel::new(vec![cat()]))).await;
    handle.get(RunningMode::Video)?;
    assert_eq!(handle.state(), DetectorState::Ready(RunningMode::Video));

    let pipeline = ImagePipeline::new(Arc::clone(&handle));
    pipeline.on_click(&target(), None).await?;
    assert_eq!(handle.state(), DetectorState::Ready(RunningMode::Image));
    Ok(())
}

#[tokio::test]
async fn failed_initialization_keeps_clicks_not_ready() {
    let handle = Arc::new(detect_server::detector::DetectorHandle::new(
        detect_server::detector::DetectorOptions::new("model.onnx"),
        failing_factory(),
    ));
    assert!(handle.initialize().await.is_err());

    let pipeline = ImagePipeline::new(handle);
    let result = pipeline.on_click(&target(), None).await;
    assert!(matches!(result, Err(DetectError::NotReady)));
}
