use crate::stream_mode::{Modality, StreamMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 3-channel byte triplets
    Rgb24,
    /// Single 16-bit infrared sample
    Ir16,
    /// Single 32-bit float, depth in meters
    DepthMeters,
    /// Single 16-bit raw depth sample in millimetres
    DepthRaw16,
}

impl PixelFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Ir16 => 2,
            PixelFormat::DepthMeters => 4,
            PixelFormat::DepthRaw16 => 2,
        }
    }

    /// Number of interleaved samples per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            _ => 1,
        }
    }

    /// Layout the synchronizer uses for a modality's buffer
    pub fn for_modality(modality: Modality) -> Self {
        match modality {
            Modality::Rgb => PixelFormat::Rgb24,
            Modality::Ir => PixelFormat::Ir16,
            Modality::Depth => PixelFormat::DepthMeters,
        }
    }
}

/// Dense row-major 2D image with interleaved channels
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<T>,
}

/// Color image, RGB byte order
pub type RgbImage = Image<u8>;
/// Infrared image
pub type IrImage = Image<u16>;
/// Depth map in meters, NaN where the sensor had no measurement
pub type DepthImage = Image<f32>;
/// Depth map as raw 16-bit millimetre samples
pub type RawDepthImage = Image<u16>;

impl<T: Copy + Default> Image<T> {
    /// Allocate a zero-filled image
    pub fn zeros(width: u32, height: u32, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![T::default(); width as usize * height as usize * channels],
        }
    }

    /// Wrap an existing sample vector, returning `None` when its length does not match
    pub fn from_vec(width: u32, height: u32, channels: usize, data: Vec<T>) -> Option<Self> {
        if data.len() != width as usize * height as usize * channels {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Sample at (x, y, channel)
    pub fn get(&self, x: u32, y: u32, channel: usize) -> Option<T> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        self.data.get(self.offset(x, y) + channel).copied()
    }
}

impl<T> Image<T> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of samples in one row
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.channels
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Mutable view of the samples. The extent itself is fixed.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.row_stride() + x as usize * self.channels
    }
}

/// Self-consistent set of frames released by one rendezvous.
///
/// Every buffer is a caller-owned copy; callbacks that fire after the
/// rendezvous cannot change it.
#[derive(Debug, Clone)]
pub struct FrameSet {
    /// Mode the set was collected for
    pub mode: StreamMode,
    /// Release counter of the synchronizer, starting at 1
    pub sequence: u64,
    /// Wall clock time of the copy-out
    pub collected_at: DateTime<Utc>,
    pub depth: Option<DepthImage>,
    pub image: Option<RgbImage>,
    pub ir: Option<IrImage>,
    /// Driver frame id of each copied buffer, indexed RGB, IR, DEPTH
    pub frame_ids: [Option<u64>; 3],
}

impl FrameSet {
    pub(crate) fn new(mode: StreamMode, sequence: u64) -> Self {
        Self {
            mode,
            sequence,
            collected_at: Utc::now(),
            depth: None,
            image: None,
            ir: None,
            frame_ids: [None; 3],
        }
    }

    /// Whether a buffer for the modality is present
    pub fn contains(&self, modality: Modality) -> bool {
        match modality {
            Modality::Rgb => self.image.is_some(),
            Modality::Ir => self.ir.is_some(),
            Modality::Depth => self.depth.is_some(),
        }
    }

    /// Driver frame id of the copied buffer for a modality
    pub fn frame_id(&self, modality: Modality) -> Option<u64> {
        self.frame_ids[modality.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.ir.is_none() && self.depth.is_none()
    }
}
