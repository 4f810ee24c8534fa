//! Frame rate accounting for the capture loop.
//!
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

#[derive(Default)]
pub struct Meter {
    captured_frames: AtomicU64,
    detected_frames: AtomicU64,
    detections: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            captured_frames: AtomicU64::new(0),
            detected_frames: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }

    pub fn tick_captured(&self) {
        self.captured_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a frame that went through detection with `detections` objects found.
    pub fn tick_detected(&self, detections: usize) {
        self.detected_frames.fetch_add(1, Ordering::Relaxed);
        self.detections.fetch_add(detections as u64, Ordering::Relaxed);
    }

    pub fn get_reset_captured(&self) -> u64 {
        self.captured_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_detected(&self) -> u64 {
        self.detected_frames.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_detections(&self) -> u64 {
        self.detections.swap(0, Ordering::Relaxed)
    }
}

/// Log captured and detected frames per second every `period`, while there are any.
pub fn spawn_meter_logger(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(period);
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let captured_frames = METER.get_reset_captured();
            let detected_frames = METER.get_reset_detected();
            let detections = METER.get_reset_detections();
            let elapsed = start.elapsed().as_secs_f32();

            if captured_frames > 0 {
                log::info!(
                    "Captured frames per second: {:.2}",
                    captured_frames as f32 / elapsed
                )
            }
            if detected_frames > 0 {
                log::info!(
                    "Detected frames per second: {:.2}, objects per frame: {:.2}",
                    detected_frames as f32 / elapsed,
                    detections as f32 / detected_frames as f32
                )
            }
        }
    })
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn counters_reset_on_read() {
        let meter = Meter::new();
        meter.tick_captured();
        meter.tick_captured();
        meter.tick_detected(3);
        meter.tick_detected(0);

        assert_eq!(meter.get_reset_captured(), 2);
        assert_eq!(meter.get_reset_detected(), 2);
        assert_eq!(meter.get_reset_detections(), 3);
        assert_eq!(meter.get_reset_captured(), 0);
        assert_eq!(meter.get_reset_detections(), 0);
    }
}
