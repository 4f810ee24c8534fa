//! Continuous detection on a live video stream.
//!
//! Once enabled, the capture loop runs once per display refresh tick: read the
//! current frame, detect, replace the live view overlays, publish the annotated
//! frame. The next tick is only awaited after all of that finished, so there is
//! never more than one detection in flight per stream.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use common::RunningMode;
use image::RgbImage;
use serde::Serialize;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    detector::{DetectorHandle, ObjectDetector},
    error::{CaptureError, DetectError},
    meter::METER,
    overlay::{draw_overlays, render_video_detections, ElementGeometry, OverlayElement},
    sensors::{CaptureDevice, FrameStream},
    surface::LiveView,
};

/// Capacity of the annotated frames channel, slow viewers skip frames.
const FRAMES_CHANNEL_CAPACITY: usize = 4;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CaptureState {
    Idle,
    Capturing,
    /// The loop ended, `reason` is set when it ended because of an error.
    Stopped { reason: Option<String> },
}

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Display refresh rate the loop is paced with.
    pub refresh_rate_hz: u32,
    /// Size the video is shown at, natural frame size when unset.
    pub display_size: Option<(f32, f32)>,
    pub jpeg_quality: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            refresh_rate_hz: 60,
            display_size: None,
            jpeg_quality: 80,
        }
    }
}

impl CaptureConfig {
    fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refresh_rate_hz.max(1) as f64)
    }

    fn geometry(&self, frame: &RgbImage) -> ElementGeometry {
        let (width, height) = frame.dimensions();
        match self.display_size {
            Some((displayed_width, displayed_height)) => {
                ElementGeometry::new(width, height, displayed_width, displayed_height)
            }
            None => ElementGeometry::unscaled(width, height),
        }
    }
}

#[derive(Default)]
struct Running {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Option<String>>>,
}

pub struct CapturePipeline {
    detector: Arc<DetectorHandle>,
    device: Arc<dyn CaptureDevice>,
    live_view: Arc<LiveView>,
    config: CaptureConfig,
    started: Instant,
    /// Last video timestamp handed out, kept across sessions.
    last_timestamp_ms: AtomicU64,
    running: Mutex<Running>,
    state_tx: watch::Sender<CaptureState>,
    frames_tx: broadcast::Sender<Bytes>,
}

impl CapturePipeline {
    pub fn new(
        detector: Arc<DetectorHandle>,
        device: Arc<dyn CaptureDevice>,
        live_view: Arc<LiveView>,
        config: CaptureConfig,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(CaptureState::Idle);
        let (frames_tx, _frames_rx) = broadcast::channel(FRAMES_CHANNEL_CAPACITY);
        Self {
            detector,
            device,
            live_view,
            config,
            started: Instant::now(),
            last_timestamp_ms: AtomicU64::new(0),
            running: Mutex::new(Running::default()),
            state_tx,
            frames_tx,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Whether webcam mode can be offered at all.
    pub fn is_available(&self) -> bool {
        self.device.is_available()
    }

    pub fn state(&self) -> CaptureState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    /// Multipart JPEG items of the annotated frames.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Bytes> {
        self.frames_tx.subscribe()
    }

    /// Acquire the video stream and start the capture loop.
    ///
    /// Returns once the first frame arrived and the loop is running.
    pub async fn enable(self: &Arc<Self>) -> Result<(), CaptureError> {
        if !self.device.is_available() {
            return Err(CaptureError::Unavailable);
        }

        let mut running = self.running.lock().await;
        if self.state() == CaptureState::Capturing {
            return Err(CaptureError::AlreadyCapturing);
        }
        if let Some(task) = running.task.take() {
            // Loop ended by itself, reap it
            task.await.ok();
        }

        let detector = self.detector.get(RunningMode::Video)?;

        match self.acquire().await {
            Ok((stream, first_frame)) => {
                // Set before spawning, the loop may end on its own right away
                self.state_tx.send_replace(CaptureState::Capturing);
                let cancel = CancellationToken::new();
                let pipeline = Arc::clone(self);
                let loop_cancel = cancel.clone();
                let task = tokio::spawn(async move {
                    pipeline
                        .run_loop(detector, stream, first_frame, loop_cancel)
                        .await
                });

                running.cancel = Some(cancel);
                running.task = Some(task);
                log::info!("Webcam capture started");
                Ok(())
            }
            Err(err) => {
                log::warn!("Webcam capture failed to start: {err}");
                self.state_tx.send_replace(CaptureState::Stopped {
                    reason: Some(err.to_string()),
                });
                Err(err)
            }
        }
    }

    /// Stop the capture loop and wait until it has ended.
    pub async fn disable(&self) {
        let mut running = self.running.lock().await;
        if let Some(cancel) = running.cancel.take() {
            cancel.cancel();
        }

        let reason = match running.task.take() {
            Some(task) => task.await.unwrap_or_else(|err| Some(err.to_string())),
            None => return,
        };

        self.live_view.clear();
        self.state_tx.send_replace(CaptureState::Stopped { reason });
        log::info!("Webcam capture stopped");
    }

    /// Open the device and wait for the first frame.
    async fn acquire(&self) -> Result<(Box<dyn FrameStream>, RgbImage), CaptureError> {
        let device = Arc::clone(&self.device);
        let mut stream = tokio::task::spawn_blocking(move || device.acquire_stream())
            .await
            .map_err(|err| CaptureError::Acquire(err.to_string()))??;

        let (stream, first_frame) = tokio::task::spawn_blocking(move || {
            let frame = stream.next_frame();
            (stream, frame)
        })
        .await
        .map_err(|err| CaptureError::Frame(err.to_string()))?;

        Ok((stream, first_frame?))
    }

    async fn run_loop(
        self: Arc<Self>,
        detector: Arc<ObjectDetector>,
        mut stream: Box<dyn FrameStream>,
        first_frame: RgbImage,
        cancel: CancellationToken,
    ) -> Option<String> {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending_frame = Some(first_frame);
        let (mut frames, mut detections) = (0u64, 0usize);

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                _ = ticker.tick() => (),
            }

            let frame = match pending_frame.take() {
                Some(frame) => frame,
                None => {
                    let read = tokio::task::spawn_blocking(move || {
                        let frame = stream.next_frame();
                        (stream, frame)
                    })
                    .await;
                    match read {
                        Ok((returned, Ok(frame))) => {
                            stream = returned;
                            frame
                        }
                        Ok((_, Err(err))) => break Some(err.to_string()),
                        Err(err) => break Some(err.to_string()),
                    }
                }
            };
            METER.tick_captured();

            let timestamp_ms = self.next_timestamp_ms();
            match self.process_frame(&detector, frame, timestamp_ms).await {
                Ok((overlays, geometry, encoded)) => {
                    frames += 1;
                    detections += overlays.len();
                    METER.tick_detected(overlays.len());
                    self.live_view.replace(overlays, geometry);
                    if let Some(encoded) = encoded {
                        self.frames_tx.send(encoded).ok();
                    }
                }
                Err(err) => break Some(err.to_string()),
            }

            if cancel.is_cancelled() {
                break None;
            }
        };

        log::info!("Capture session: {frames} frames, {detections} detections");
        if let Some(reason) = reason.as_deref() {
            log::warn!("Capture loop ended: {reason}");
            self.live_view.clear();
            self.state_tx.send_replace(CaptureState::Stopped {
                reason: Some(reason.to_owned()),
            });
        }
        reason
    }

    /// Milliseconds since the pipeline was created.
    ///
    /// Strictly increasing over the lifetime of the pipeline, also across sessions
    /// that reuse the same video detector.
    fn next_timestamp_ms(&self) -> u64 {
        let now = self.started.elapsed().as_millis() as u64;
        let next = |last: u64| now.max(last + 1);
        match self
            .last_timestamp_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => next(last),
        }
    }

    /// Detect on one frame and render the results.
    ///
    /// The frame is annotated and encoded only when someone watches the stream.
    async fn process_frame(
        &self,
        detector: &Arc<ObjectDetector>,
        frame: RgbImage,
        timestamp_ms: u64,
    ) -> Result<(Vec<OverlayElement>, ElementGeometry, Option<Bytes>), DetectError> {
        let detector = Arc::clone(detector);
        let geometry = self.config.geometry(&frame);
        let publish = self.frames_tx.receiver_count() > 0;
        let quality = self.config.jpeg_quality;

        tokio::task::spawn_blocking(move || -> Result<_, DetectError> {
            let mut frame = frame;
            let result = detector.detect_for_video(&frame, timestamp_ms)?;
            let overlays = render_video_detections(&result, &geometry);
            log::debug!("Frame {timestamp_ms} ms: {} detections", result.len());

            let encoded = if publish {
                draw_overlays(&mut frame, &overlays, geometry.ratio());
                match turbojpeg::compress_image(&frame, quality, turbojpeg::Subsamp::Sub2x2) {
                    Ok(buf) => Some(as_jpeg_stream_item(&buf)),
                    Err(err) => {
                        log::warn!("Failed to encode frame: {err}");
                        None
                    }
                }
            } else {
                None
            };

            Ok((overlays, geometry, encoded))
        })
        .await
        .map_err(|err| DetectError::Inference(err.into()))?
    }
}

/// Wrap a JPEG as part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
