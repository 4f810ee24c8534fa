//! Detector initialization and running-mode bookkeeping.
//!
//! The inference backend is loaded once. Each [`ObjectDetector`] wraps the loaded
//! model together with the [`RunningMode`] it was created for and refuses calls to
//! the entry point of the other mode. [`DetectorHandle`] owns the current instance
//! and tells callers whether the detector is usable yet.
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use common::{Delegate, DetectionResult, RunningMode};
use image::RgbImage;
use tokio::sync::watch;

use crate::{error::DetectError, utils::resolve_asset};

/// Minimum score for a detection to be reported.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;

/// Backend that turns pixels into detections, independent of the running mode.
pub trait InferModel: Send + Sync {
    fn run(&self, input: &RgbImage) -> Result<DetectionResult>;
}

/// Builds an inference backend from detector options.
///
/// Called on a blocking thread, loading a model may take a while.
pub trait ModelFactory: Send + Sync {
    fn create(&self, options: &DetectorOptions) -> Result<Arc<dyn InferModel>>;
}

impl<F> ModelFactory for F
where
    F: Fn(&DetectorOptions) -> Result<Arc<dyn InferModel>> + Send + Sync,
{
    fn create(&self, options: &DetectorOptions) -> Result<Arc<dyn InferModel>> {
        self(options)
    }
}

/// Configuration of the object detector.
#[derive(Clone, Debug)]
pub struct DetectorOptions {
    /// Local path or http(s) URL of the model.
    pub model_asset: String,
    /// Local path or http(s) URL of a newline separated label list.
    pub labels_asset: Option<String>,
    pub delegate: Delegate,
    pub score_threshold: f32,
    pub max_results: Option<usize>,
    pub running_mode: RunningMode,
}

impl DetectorOptions {
    pub fn new(model_asset: impl Into<String>) -> Self {
        Self {
            model_asset: model_asset.into(),
            labels_asset: None,
            delegate: Delegate::default(),
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            max_results: None,
            running_mode: RunningMode::default(),
        }
    }
}

/// A loaded detector bound to one running mode.
pub struct ObjectDetector {
    model: Arc<dyn InferModel>,
    running_mode: RunningMode,
    max_results: Option<usize>,
    last_timestamp_ms: Mutex<Option<u64>>,
}

impl ObjectDetector {
    pub fn new(model: Arc<dyn InferModel>, running_mode: RunningMode) -> Self {
        Self {
            model,
            running_mode,
            max_results: None,
            last_timestamp_ms: Mutex::new(None),
        }
    }

    pub fn with_max_results(mut self, max_results: Option<usize>) -> Self {
        self.max_results = max_results;
        self
    }

    /// A new instance sharing the loaded model but running in `mode`.
    pub fn for_mode(&self, mode: RunningMode) -> Self {
        Self::new(Arc::clone(&self.model), mode).with_max_results(self.max_results)
    }

    pub fn running_mode(&self) -> RunningMode {
        self.running_mode
    }

    /// Detect objects in a still image. Only valid in [`RunningMode::Image`].
    pub fn detect(&self, image: &RgbImage) -> Result<DetectionResult, DetectError> {
        self.check_mode(RunningMode::Image)?;
        self.run(image)
    }

    /// Detect objects in one video frame. Only valid in [`RunningMode::Video`].
    ///
    /// Timestamps must be strictly increasing across calls on the same instance.
    pub fn detect_for_video(
        &self,
        frame: &RgbImage,
        timestamp_ms: u64,
    ) -> Result<DetectionResult, DetectError> {
        self.check_mode(RunningMode::Video)?;
        {
            let mut last = self
                .last_timestamp_ms
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(last) = *last {
                if timestamp_ms <= last {
                    return Err(DetectError::NonMonotonicTimestamp {
                        last,
                        got: timestamp_ms,
                    });
                }
            }
            *last = Some(timestamp_ms);
        }
        self.run(frame)
    }

    fn check_mode(&self, expected: RunningMode) -> Result<(), DetectError> {
        if self.running_mode != expected {
            return Err(DetectError::ModeMismatch {
                expected,
                actual: self.running_mode,
            });
        }
        Ok(())
    }

    fn run(&self, image: &RgbImage) -> Result<DetectionResult, DetectError> {
        let mut result = self.model.run(image).map_err(DetectError::Inference)?;
        if let Some(max_results) = self.max_results {
            result.detections.truncate(max_results);
        }
        Ok(result)
    }
}

/// Lifecycle of the detector as seen by the UI.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorState {
    Loading,
    Ready(RunningMode),
    Failed(String),
}

/// Shared owner of the detector instance.
pub struct DetectorHandle {
    options: DetectorOptions,
    factory: Arc<dyn ModelFactory>,
    current: RwLock<Option<Arc<ObjectDetector>>>,
    state_tx: watch::Sender<DetectorState>,
}

impl DetectorHandle {
    pub fn new(options: DetectorOptions, factory: Arc<dyn ModelFactory>) -> Self {
        let (state_tx, _state_rx) = watch::channel(DetectorState::Loading);
        Self {
            options,
            factory,
            current: RwLock::new(None),
            state_tx,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DetectorState> {
        self.state_tx.subscribe()
    }

    /// Resolve the assets and load the model.
    ///
    /// On failure the handle stays unusable and remembers the reason.
    pub async fn initialize(&self) -> Result<()> {
        match self.load().await {
            Ok(detector) => {
                let mode = detector.running_mode();
                let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
                *current = Some(Arc::new(detector));
                drop(current);
                self.state_tx.send_replace(DetectorState::Ready(mode));
                log::info!("Object detector ready in {} mode", mode);
                Ok(())
            }
            Err(err) => {
                log::error!("Failed to initialize object detector: {err:#}");
                self.state_tx
                    .send_replace(DetectorState::Failed(format!("{err:#}")));
                Err(err)
            }
        }
    }

    async fn load(&self) -> Result<ObjectDetector> {
        let mut options = self.options.clone();
        options.model_asset = resolve_asset(&options.model_asset)
            .await?
            .to_string_lossy()
            .into_owned();
        if let Some(labels) = options.labels_asset.as_deref() {
            let labels = resolve_asset(labels).await?;
            options.labels_asset = Some(labels.to_string_lossy().into_owned());
        }

        if options.delegate == Delegate::Gpu {
            log::warn!("GPU delegate requested, inference backend runs on CPU");
        }

        log::info!("Loading model {}", &options.model_asset);
        let factory = Arc::clone(&self.factory);
        let model = tokio::task::spawn_blocking(move || {
            factory
                .create(&options)
                .map(|model| (model, options.running_mode, options.max_results))
        })
        .await??;

        let (model, mode, max_results) = model;
        Ok(ObjectDetector::new(model, mode).with_max_results(max_results))
    }

    /// Wait until initialization finished, successfully or not.
    pub async fn wait_initialized(&self) -> DetectorState {
        let mut rx = self.subscribe();
        loop {
            let state = rx.borrow_and_update().clone();
            if state != DetectorState::Loading {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// Get a detector for `mode`.
    ///
    /// When the current instance runs in the other mode, a new instance sharing the
    /// loaded model replaces it. Calls already running keep their instance.
    pub fn get(&self, mode: RunningMode) -> Result<Arc<ObjectDetector>, DetectError> {
        {
            let current = self.current.read().unwrap_or_else(|p| p.into_inner());
            match current.as_ref() {
                None => return Err(DetectError::NotReady),
                Some(detector) if detector.running_mode() == mode => {
                    return Ok(Arc::clone(detector))
                }
                Some(_) => (),
            }
        }

        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        let detector = match current.as_ref() {
            None => return Err(DetectError::NotReady),
            Some(detector) if detector.running_mode() == mode => Arc::clone(detector),
            Some(detector) => {
                log::info!(
                    "Switching detector from {} to {} mode",
                    detector.running_mode(),
                    mode
                );
                Arc::new(detector.for_mode(mode))
            }
        };
        *current = Some(Arc::clone(&detector));
        self.state_tx.send_replace(DetectorState::Ready(mode));

        Ok(detector)
    }
}
