//! Command line configuration.
//!
use std::path::PathBuf;

use clap::Parser;
use common::{Delegate, RunningMode};

use crate::{
    capture::CaptureConfig,
    detector::{DetectorOptions, DEFAULT_SCORE_THRESHOLD},
    sensors::V4lCamera,
};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Object detection demo on images and webcam streams")]
pub struct Args {
    /// Address of the HTTP server
    #[clap(long, default_value = "127.0.0.1:3000")]
    pub server_address: String,

    /// Directory with the images offered for detection
    #[clap(long, default_value = "images")]
    pub images_dir: PathBuf,

    /// Path or URL of the ONNX object detection model
    #[clap(long, default_value = "ssd_mobilenet.onnx")]
    pub model: String,

    /// Path or URL of the label list, one label per line
    #[clap(long)]
    pub labels: Option<String>,

    /// Preferred execution backend (CPU or GPU)
    #[clap(long, default_value_t = Delegate::Gpu)]
    pub delegate: Delegate,

    /// Minimum score of reported detections
    #[clap(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
    pub score_threshold: f32,

    /// Maximum number of detections per call
    #[clap(long)]
    pub max_results: Option<usize>,

    /// Running mode the detector starts in (IMAGE or VIDEO)
    #[clap(long, default_value_t = RunningMode::Image)]
    pub running_mode: RunningMode,

    /// Video capture device
    #[clap(long, default_value = "/dev/video0")]
    pub camera: String,

    /// Capture resolution, e.g. 1280x720. Highest supported when unset
    #[clap(long, value_parser = parse_size)]
    pub resolution: Option<(u32, u32)>,

    /// Size the webcam video is displayed at, e.g. 640x360. Frame size when unset
    #[clap(long, value_parser = parse_size)]
    pub display_size: Option<(u32, u32)>,

    /// Display refresh rate pacing the capture loop
    #[clap(long, default_value_t = 60)]
    pub refresh_rate: u32,
}

impl Args {
    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            model_asset: self.model.clone(),
            labels_asset: self.labels.clone(),
            delegate: self.delegate,
            score_threshold: self.score_threshold,
            max_results: self.max_results,
            running_mode: self.running_mode,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            refresh_rate_hz: self.refresh_rate,
            display_size: self
                .display_size
                .map(|(width, height)| (width as f32, height as f32)),
            ..Default::default()
        }
    }

    pub fn camera(&self) -> V4lCamera {
        V4lCamera {
            resolution: self.resolution,
            ..V4lCamera::new(&self.camera)
        }
    }
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{s}`"))?;
    let width = width.trim().parse().map_err(|err| format!("width: {err}"))?;
    let height = height.trim().parse().map_err(|err| format!("height: {err}"))?;
    Ok((width, height))
}
