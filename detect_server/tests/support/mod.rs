//! Fakes standing in for the model and the camera.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use common::{BoundingBox, Category, Detection, DetectionResult};
use detect_server::{
    detector::{DetectorHandle, DetectorOptions, InferModel, ModelFactory},
    error::CaptureError,
    sensors::{CaptureDevice, FrameStream},
};
use image::RgbImage;
use tokio::sync::Notify;

pub fn detection(name: &str, score: f32, bbox: (f32, f32, f32, f32)) -> Detection {
    Detection::new(
        vec![Category::new(0, score, name)],
        BoundingBox::new(bbox.0, bbox.1, bbox.2, bbox.3),
    )
}

pub fn cat() -> DetectionResult {
    DetectionResult::new(vec![detection("cat", 0.92, (10.0, 20.0, 100.0, 50.0))])
}

/// Returns the scripted results in order, repeating the last one.
///
/// Tracks how many calls run at the same time.
pub struct ScriptedModel {
    results: Vec<DetectionResult>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new(results: Vec<DetectionResult>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl InferModel for ScriptedModel {
    fn run(&self, _input: &RgbImage) -> Result<DetectionResult> {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let result = self
            .results
            .get(call)
            .or_else(|| self.results.last())
            .cloned()
            .unwrap_or_default();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}

/// Blocks its first call until released, later calls return immediately.
pub struct GatedModel {
    first: DetectionResult,
    rest: DetectionResult,
    calls: AtomicUsize,
    pub entered: Arc<Notify>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedModel {
    pub fn new(first: DetectionResult, rest: DetectionResult) -> (Self, mpsc::Sender<()>) {
        let (release_tx, release_rx) = mpsc::channel();
        let model = Self {
            first,
            rest,
            calls: AtomicUsize::new(0),
            entered: Arc::new(Notify::new()),
            release: Mutex::new(release_rx),
        };
        (model, release_tx)
    }
}

impl InferModel for GatedModel {
    fn run(&self, _input: &RgbImage) -> Result<DetectionResult> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            let release = self.release.lock().unwrap();
            release.recv_timeout(Duration::from_secs(5))?;
            return Ok(self.first.clone());
        }
        Ok(self.rest.clone())
    }
}

pub fn factory_for(model: Arc<dyn InferModel>) -> Arc<dyn ModelFactory> {
    Arc::new(move |_: &DetectorOptions| -> Result<Arc<dyn InferModel>> { Ok(Arc::clone(&model)) })
}

pub fn failing_factory() -> Arc<dyn ModelFactory> {
    Arc::new(|_: &DetectorOptions| -> Result<Arc<dyn InferModel>> {
        bail!("model asset unreachable")
    })
}

pub async fn ready_handle(model: Arc<dyn InferModel>) -> Arc<DetectorHandle> {
    let handle = Arc::new(DetectorHandle::new(
        DetectorOptions::new("model.onnx"),
        factory_for(model),
    ));
    handle.initialize().await.unwrap();
    handle
}

pub fn loading_handle(model: Arc<dyn InferModel>) -> Arc<DetectorHandle> {
    Arc::new(DetectorHandle::new(
        DetectorOptions::new("model.onnx"),
        factory_for(model),
    ))
}

/// Camera producing blank frames.
pub struct FakeCamera {
    pub available: bool,
    pub fail_acquire: bool,
    /// Frame reads fail after this many frames.
    pub frame_limit: Option<usize>,
    pub frames: Arc<AtomicUsize>,
    pub acquired: AtomicBool,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            available: true,
            fail_acquire: false,
            frame_limit: None,
            frames: Arc::new(AtomicUsize::new(0)),
            acquired: AtomicBool::new(false),
        }
    }
}

struct FakeStream {
    frames: Arc<AtomicUsize>,
    frame_limit: Option<usize>,
}

impl FrameStream for FakeStream {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let frame = self.frames.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.frame_limit {
            if frame >= limit {
                return Err(CaptureError::Frame("device unplugged".to_owned()));
            }
        }
        Ok(RgbImage::new(64, 48))
    }
}

impl CaptureDevice for FakeCamera {
    fn is_available(&self) -> bool {
        self.available
    }

    fn acquire_stream(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        if self.fail_acquire {
            return Err(CaptureError::Acquire("permission denied".to_owned()));
        }
        self.acquired.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            frames: Arc::clone(&self.frames),
            frame_limit: self.frame_limit,
        }))
    }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
