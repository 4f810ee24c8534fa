//! Sensors module.
//!
//! Video capture devices and the frame streams acquired from them.
use std::path::Path;

use image::RgbImage;
use rscam::{Camera, Config};

use crate::error::CaptureError;

/// A live stream of video frames.
pub trait FrameStream: Send {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError>;
}

/// A source of live video.
pub trait CaptureDevice: Send + Sync {
    /// Whether this environment offers camera capture at all.
    fn is_available(&self) -> bool;

    /// Open the device and start streaming.
    ///
    /// May block while the device starts up.
    fn acquire_stream(&self) -> Result<Box<dyn FrameStream>, CaptureError>;
}

/// V4L2 camera on a Linux machine, streaming MJPEG.
#[derive(Clone, Debug)]
pub struct V4lCamera {
    pub device_name: String,
    pub format: String,
    /// Uses the highest supported resolution when unset.
    pub resolution: Option<(u32, u32)>,
    /// Uses the highest supported frame rate when unset.
    pub frame_rate: Option<(u32, u32)>,
}

impl V4lCamera {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            format: "MJPG".to_owned(),
            resolution: None,
            frame_rate: None,
        }
    }
}

impl CaptureDevice for V4lCamera {
    fn is_available(&self) -> bool {
        Path::new(&self.device_name).exists()
    }

    fn acquire_stream(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        if !self.is_available() {
            return Err(CaptureError::Unavailable);
        }

        let mut cam = Camera::new(&self.device_name)
            .map_err(|err| CaptureError::Acquire(format!("{}: {err}", &self.device_name)))?;
        log_supported_formats(&cam, &self.format);
        let format = self.format.as_bytes();

        log::info!("Using camera {}", &self.device_name);

        let resolution = self
            .resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let frame_rate = self
            .frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })
        .map_err(|err| CaptureError::Acquire(err.to_string()))?;

        log::info!(
            "Streaming {}x{} at {}/{} s per frame",
            resolution.0,
            resolution.1,
            frame_rate.0,
            frame_rate.1
        );

        Ok(Box::new(V4lStream { cam }))
    }
}

struct V4lStream {
    cam: Camera,
}

impl FrameStream for V4lStream {
    fn next_frame(&mut self) -> Result<RgbImage, CaptureError> {
        let frame = self
            .cam
            .capture()
            .map_err(|err| CaptureError::Frame(err.to_string()))?;
        log::debug!("Captured frame ({} bytes)", frame.len());

        turbojpeg::decompress_image(&frame[..]).map_err(|err| CaptureError::Frame(err.to_string()))
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32), CaptureError> {
    let resolution_info = cam
        .resolutions(format)
        .map_err(|err| CaptureError::Acquire(err.to_string()))?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| CaptureError::Acquire("no resolution found".to_owned()))
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(
    cam: &Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32), CaptureError> {
    let interval_info = cam
        .intervals(format, resolution)
        .map_err(|err| CaptureError::Acquire(err.to_string()))?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
            .iter()
            // Intervals are (numerator, denominator) seconds per frame
            .max_by_key(|(numerator, denominator)| denominator / numerator.max(&1))
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| CaptureError::Acquire("no frame rate found".to_owned()))
}

fn log_supported_formats(cam: &Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn missing_device_is_unavailable() {
        let camera = V4lCamera::new("/dev/does-not-exist");
        assert!(!camera.is_available());
        assert!(matches!(
            camera.acquire_stream(),
            Err(CaptureError::Unavailable)
        ));
    }

    #[test]
    fn get_cam_info_if_available() -> Result<(), CaptureError> {
        let camera = V4lCamera::new("/dev/video0");
        if !camera.is_available() {
            println!("No camera available, skipping");
            return Ok(());
        }

        match Camera::new(&camera.device_name) {
            Err(err) => println!("Could not open camera: {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                if let Ok(resolution) = get_max_resolution(&cam, b"MJPG") {
                    println!("Selected resolution: {resolution:?}");
                    let frame_rate = get_max_frame_rate(&cam, b"MJPG", resolution)?;
                    println!("Selected frame rate: {frame_rate:?}");
                }
            }
        }

        Ok(())
    }
}
