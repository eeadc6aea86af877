//! Polling capture without per-modality readiness tracking.
//!
//! A single thread blocks on the driver-wide update and decodes whatever
//! color and depth frames the driver reports as latest. There is no
//! guarantee both buffers were refreshed by the same update.

use crate::device::{is_supported, DepthDevice, DepthDriver, DriverFrame, OutputMode};
use crate::error::{DeviceError, Result, SyncError};
use crate::frame::{RawDepthImage, RgbImage};
use crate::stream_mode::{Modality, StreamMode};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Latest color and raw depth frames returned by [`PollingCapture::grab_all`]
#[derive(Debug, Clone)]
pub struct RawCapture {
    pub image: RgbImage,
    /// Depth in millimetres, 0 where the sensor had no measurement
    pub depth: RawDepthImage,
    /// Modalities refreshed by this grab
    pub updated: StreamMode,
    pub image_frame_id: Option<u64>,
    pub depth_frame_id: Option<u64>,
    pub grabbed_at: DateTime<Utc>,
}

pub struct PollingCapture {
    device: Arc<dyn DepthDevice>,
    streams: StreamMode,
    registration_enabled: bool,
    image: RgbImage,
    depth: RawDepthImage,
    image_frame_id: Option<u64>,
    depth_frame_id: Option<u64>,
}

impl PollingCapture {
    /// Open the device at `index` and start its color and depth streams
    pub fn open(
        driver: &dyn DepthDriver,
        index: usize,
        rgb_mode: OutputMode,
        depth_mode: OutputMode,
        registration: bool,
    ) -> Result<Self> {
        let available = driver.device_count();
        if index >= available {
            return Err(DeviceError::IndexOutOfRange { index, available }.into());
        }
        let device = driver.open_device(index)?;

        let mut streams = StreamMode::DEPTH;
        if device.has_stream(Modality::Rgb) {
            if !is_supported(device.as_ref(), Modality::Rgb, rgb_mode) {
                return Err(unsupported(Modality::Rgb, rgb_mode).into());
            }
            streams.insert(Modality::Rgb);
        }
        if !device.has_stream(Modality::Depth) {
            return Err(DeviceError::MissingModality {
                modality: Modality::Depth,
            }
            .into());
        }
        if !is_supported(device.as_ref(), Modality::Depth, depth_mode) {
            return Err(unsupported(Modality::Depth, depth_mode).into());
        }

        let registration_enabled = registration
            && streams.contains(Modality::Rgb)
            && device.is_registration_supported()
            && match device.set_registration(true) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Could not enable depth registration: {}", e);
                    false
                }
            };

        let mut capture = Self {
            device,
            streams: StreamMode::NONE,
            registration_enabled,
            image: RgbImage::zeros(rgb_mode.width, rgb_mode.height, 3),
            depth: RawDepthImage::zeros(depth_mode.width, depth_mode.height, 1),
            image_frame_id: None,
            depth_frame_id: None,
        };

        for modality in streams.modalities() {
            capture.device.start_stream(modality)?;
            capture.streams.insert(modality);
        }

        info!(
            "Polling capture on {}: color {}, depth {}, registration {}",
            capture.device.connection_string(),
            rgb_mode,
            depth_mode,
            registration_enabled
        );
        Ok(capture)
    }

    pub fn streams(&self) -> StreamMode {
        self.streams
    }

    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    /// Block until the driver reports any update, then decode the latest frames.
    ///
    /// Buffers that were not refreshed keep their previous contents.
    pub fn grab_all(&mut self, timeout: Duration) -> Result<RawCapture> {
        let started = Instant::now();
        let frames = self.device.wait_for_update(timeout)?;
        if frames.is_empty() {
            return Err(SyncError::Timeout {
                mode: self.streams,
                ready: StreamMode::NONE,
                waited: started.elapsed(),
            }
            .into());
        }

        let mut updated = StreamMode::NONE;
        for frame in &frames {
            if self.decode(frame) {
                updated.insert(frame.modality());
            }
        }

        Ok(RawCapture {
            image: self.image.clone(),
            depth: self.depth.clone(),
            updated,
            image_frame_id: self.image_frame_id,
            depth_frame_id: self.depth_frame_id,
            grabbed_at: Utc::now(),
        })
    }

    fn decode(&mut self, frame: &DriverFrame) -> bool {
        let result = match frame.modality() {
            Modality::Rgb => frame
                .fill_rgb(&mut self.image)
                .map(|()| self.image_frame_id = Some(frame.frame_id)),
            Modality::Depth => frame
                .fill_depth_raw(&mut self.depth)
                .map(|()| self.depth_frame_id = Some(frame.frame_id)),
            Modality::Ir => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Skipping {} frame {}: {}", frame.modality(), frame.frame_id, e);
                false
            }
        }
    }
}

impl Drop for PollingCapture {
    fn drop(&mut self) {
        if !self.device.is_connected() {
            return;
        }
        for modality in self.streams.modalities() {
            if let Err(e) = self.device.stop_stream(modality) {
                warn!("Failed to stop {} stream: {}", modality, e);
            }
        }
    }
}

fn unsupported(modality: Modality, mode: OutputMode) -> DeviceError {
    DeviceError::UnsupportedMode {
        modality,
        width: mode.width,
        height: mode.height,
        fps: mode.fps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MockDevice, MockDriver};
    use std::thread;

    fn mode() -> OutputMode {
        OutputMode::new(8, 6, 30)
    }

    #[test]
    fn test_open_starts_color_and_depth() {
        let device = MockDevice::builder().build();
        let driver = MockDriver::with_device(Arc::clone(&device));

        let capture = PollingCapture::open(&driver, 0, mode(), mode(), true).unwrap();
        assert_eq!(capture.streams(), StreamMode::DEPTH_RGB);
        assert_eq!(device.streaming(), StreamMode::DEPTH_RGB);
        assert!(capture.registration_enabled());

        drop(capture);
        assert_eq!(device.streaming(), StreamMode::NONE);
    }

    #[test]
    fn test_grab_all_decodes_latest_frames() {
        let device = MockDevice::builder().build();
        let driver = MockDriver::with_device(Arc::clone(&device));
        let mut capture = PollingCapture::open(&driver, 0, mode(), mode(), false).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(30));
                device.emit(Modality::Depth);
            });
            let grabbed = capture.grab_all(Duration::from_secs(2)).unwrap();
            assert_eq!(grabbed.updated, StreamMode::DEPTH);
            assert_eq!(grabbed.depth.get(0, 0, 0), Some(501));
            assert_eq!(grabbed.depth_frame_id, Some(1));
            assert_eq!(grabbed.image_frame_id, None);
        });
    }

    #[test]
    fn test_grab_all_times_out_without_updates() {
        let device = MockDevice::builder().build();
        let driver = MockDriver::with_device(device);
        let mut capture = PollingCapture::open(&driver, 0, mode(), mode(), false).unwrap();

        let err = capture.grab_all(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_rejected_color_mode_fails_open() {
        let rejected = OutputMode::new(1280, 1024, 30);
        let device = MockDevice::builder()
            .reject_mode(Modality::Rgb, rejected)
            .build();
        let driver = MockDriver::with_device(Arc::clone(&device));

        assert!(PollingCapture::open(&driver, 0, rejected, mode(), false).is_err());
        assert!(device.commands().is_empty());
    }

    #[test]
    fn test_disconnect_is_reported() {
        let device = MockDevice::builder().build();
        let driver = MockDriver::with_device(Arc::clone(&device));
        let mut capture = PollingCapture::open(&driver, 0, mode(), mode(), false).unwrap();

        device.disconnect();
        assert!(capture
            .grab_all(Duration::from_millis(20))
            .unwrap_err()
            .is_device_lost());
    }
}
