use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Highest frame rate the sensor family delivers at SXGA
const SXGA_MAX_FPS: u32 = 15;

/// Resolution presets exposed to the host configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolution {
    /// 320x240
    Qvga,
    /// 640x480
    Vga,
    /// 1024x768
    Xga,
    /// 1280x1024
    Sxga,
}

impl Resolution {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Qvga => (320, 240),
            Resolution::Vga => (640, 480),
            Resolution::Xga => (1024, 768),
            Resolution::Sxga => (1280, 1024),
        }
    }

    /// Highest frame rate supported at this resolution, if limited
    pub fn max_fps(&self) -> Option<u32> {
        match self {
            Resolution::Sxga => Some(SXGA_MAX_FPS),
            _ => None,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resolution::Qvga => "QVGA",
            Resolution::Vga => "VGA",
            Resolution::Xga => "XGA",
            Resolution::Sxga => "SXGA",
        };
        f.write_str(name)
    }
}

/// Map output mode negotiated with the device: extent and frame rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputMode {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl OutputMode {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Derive the output mode for a preset, clamping the frame rate where the preset limits it
    pub fn from_resolution(resolution: Resolution, fps: u32) -> Self {
        let (width, height) = resolution.dimensions();
        let fps = match resolution.max_fps() {
            Some(max) if fps > max => {
                warn!(
                    "{} supports at most {}fps, clamping requested {}fps",
                    resolution, max, fps
                );
                max
            }
            _ => fps,
        };
        Self { width, height, fps }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Nominal interval between two frames of one stream
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_micros(1_000_000 / self.fps.max(1) as u64)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} @ {}", self.width, self.height, self.fps)
    }
}
