use crate::error::FrameError;
use crate::frame::{DepthImage, Image, IrImage, RawDepthImage, RgbImage};
use crate::stream_mode::Modality;
use std::time::Duration;

/// Pixel data as handed over by the driver
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// Interleaved RGB byte triplets
    Rgb24(Vec<u8>),
    /// 16-bit infrared samples
    Ir16(Vec<u16>),
    /// 16-bit depth samples in millimetres
    DepthMillimeters {
        samples: Vec<u16>,
        /// Sample value the sensor reports where no depth could be measured
        no_sample_value: u16,
        /// Sample value the sensor reports for occluded pixels
        shadow_value: u16,
    },
}

/// One frame delivered by a driver callback
#[derive(Debug, Clone, PartialEq)]
pub struct DriverFrame {
    /// Per-stream frame counter assigned by the driver
    pub frame_id: u64,
    /// Device timestamp. Not reconciled across modalities.
    pub timestamp: Duration,
    pub width: u32,
    pub height: u32,
    pub payload: FramePayload,
}

impl DriverFrame {
    pub fn rgb(frame_id: u64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            frame_id,
            timestamp: Duration::ZERO,
            width,
            height,
            payload: FramePayload::Rgb24(data),
        }
    }

    pub fn ir(frame_id: u64, width: u32, height: u32, data: Vec<u16>) -> Self {
        Self {
            frame_id,
            timestamp: Duration::ZERO,
            width,
            height,
            payload: FramePayload::Ir16(data),
        }
    }

    /// Depth frame with 0 as both the no-sample and the shadow value
    pub fn depth(frame_id: u64, width: u32, height: u32, samples: Vec<u16>) -> Self {
        Self {
            frame_id,
            timestamp: Duration::ZERO,
            width,
            height,
            payload: FramePayload::DepthMillimeters {
                samples,
                no_sample_value: 0,
                shadow_value: 0,
            },
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn modality(&self) -> Modality {
        match self.payload {
            FramePayload::Rgb24(_) => Modality::Rgb,
            FramePayload::Ir16(_) => Modality::Ir,
            FramePayload::DepthMillimeters { .. } => Modality::Depth,
        }
    }

    /// Decode into a pre-allocated RGB buffer
    pub fn fill_rgb(&self, target: &mut RgbImage) -> Result<(), FrameError> {
        match &self.payload {
            FramePayload::Rgb24(data) => self.decimate(data, 3, target, |v| v),
            _ => Err(self.wrong_modality(Modality::Rgb)),
        }
    }

    /// Decode into a pre-allocated IR buffer
    pub fn fill_ir(&self, target: &mut IrImage) -> Result<(), FrameError> {
        match &self.payload {
            FramePayload::Ir16(data) => self.decimate(data, 1, target, |v| v),
            _ => Err(self.wrong_modality(Modality::Ir)),
        }
    }

    /// Decode into a depth buffer in meters; invalid samples become NaN
    pub fn fill_depth(&self, target: &mut DepthImage) -> Result<(), FrameError> {
        match &self.payload {
            FramePayload::DepthMillimeters {
                samples,
                no_sample_value,
                shadow_value,
            } => {
                let (no_sample, shadow) = (*no_sample_value, *shadow_value);
                self.decimate(samples, 1, target, |mm| {
                    if mm == 0 || mm == no_sample || mm == shadow {
                        f32::NAN
                    } else {
                        mm as f32 * 0.001
                    }
                })
            }
            _ => Err(self.wrong_modality(Modality::Depth)),
        }
    }

    /// Copy raw millimetre samples into a 16-bit depth buffer
    pub fn fill_depth_raw(&self, target: &mut RawDepthImage) -> Result<(), FrameError> {
        match &self.payload {
            FramePayload::DepthMillimeters { samples, .. } => {
                self.decimate(samples, 1, target, |v| v)
            }
            _ => Err(self.wrong_modality(Modality::Depth)),
        }
    }

    fn wrong_modality(&self, expected: Modality) -> FrameError {
        FrameError::WrongModality {
            expected,
            actual: self.modality(),
        }
    }

    /// Copy `source` into `target`, taking every n-th pixel when the frame is
    /// an exact integer multiple of the buffer in each direction.
    fn decimate<S: Copy, D>(
        &self,
        source: &[S],
        channels: usize,
        target: &mut Image<D>,
        convert: impl Fn(S) -> D,
    ) -> Result<(), FrameError> {
        let (target_width, target_height) = target.dimensions();
        let mismatch = FrameError::DimensionMismatch {
            width: self.width,
            height: self.height,
            target_width,
            target_height,
        };

        if target_width == 0
            || target_height == 0
            || self.width < target_width
            || self.height < target_height
            || self.width % target_width != 0
            || self.height % target_height != 0
            || target.channels() != channels
        {
            return Err(mismatch);
        }

        let expected = self.width as usize * self.height as usize * channels;
        if source.len() < expected {
            return Err(FrameError::Truncated {
                expected,
                actual: source.len(),
            });
        }

        let step_x = (self.width / target_width) as usize;
        let step_y = (self.height / target_height) as usize;
        let source_stride = self.width as usize * channels;
        let target_stride = target.row_stride();
        let data = target.as_mut_slice();

        for (y, row) in data.chunks_exact_mut(target_stride).enumerate() {
            let source_row = &source[y * step_y * source_stride..];
            for (x, pixel) in row.chunks_exact_mut(channels).enumerate() {
                let offset = x * step_x * channels;
                for (c, sample) in pixel.iter_mut().enumerate() {
                    *sample = convert(source_row[offset + c]);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_rgb_exact_size() {
        let data: Vec<u8> = (0..12).collect();
        let frame = DriverFrame::rgb(1, 2, 2, data.clone());
        let mut target = RgbImage::zeros(2, 2, 3);
        frame.fill_rgb(&mut target).unwrap();
        assert_eq!(target.as_slice(), data.as_slice());
    }

    #[test]
    fn test_fill_rgb_decimates_integer_factor() {
        // 4x2 source, every pixel's red channel holds its x coordinate
        let mut data = Vec::new();
        for _y in 0..2u8 {
            for x in 0..4u8 {
                data.extend_from_slice(&[x, 0, 0]);
            }
        }
        let frame = DriverFrame::rgb(1, 4, 2, data);
        let mut target = RgbImage::zeros(2, 1, 3);
        frame.fill_rgb(&mut target).unwrap();
        assert_eq!(target.get(0, 0, 0), Some(0));
        assert_eq!(target.get(1, 0, 0), Some(2));
    }

    #[test]
    fn test_fill_rejects_non_integer_factor() {
        let frame = DriverFrame::ir(1, 3, 3, vec![0; 9]);
        let mut target = IrImage::zeros(2, 2, 1);
        assert!(matches!(
            frame.fill_ir(&mut target),
            Err(FrameError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_fill_rejects_truncated_payload() {
        let frame = DriverFrame::ir(1, 2, 2, vec![0; 3]);
        let mut target = IrImage::zeros(2, 2, 1);
        assert_eq!(
            frame.fill_ir(&mut target),
            Err(FrameError::Truncated {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_fill_depth_converts_to_meters() {
        let mut frame = DriverFrame::depth(1, 2, 2, vec![1000, 0, 2047, 1500]);
        if let FramePayload::DepthMillimeters { shadow_value, .. } = &mut frame.payload {
            *shadow_value = 2047;
        }
        let mut target = DepthImage::zeros(2, 2, 1);
        frame.fill_depth(&mut target).unwrap();

        let samples = target.as_slice();
        assert!((samples[0] - 1.0).abs() < f32::EPSILON);
        assert!(samples[1].is_nan());
        assert!(samples[2].is_nan());
        assert!((samples[3] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_fill_depth_raw_keeps_samples() {
        let frame = DriverFrame::depth(1, 2, 1, vec![800, 0]);
        let mut target = RawDepthImage::zeros(2, 1, 1);
        frame.fill_depth_raw(&mut target).unwrap();
        assert_eq!(target.as_slice(), &[800, 0]);
    }

    #[test]
    fn test_fill_wrong_modality() {
        let frame = DriverFrame::ir(1, 2, 2, vec![0; 4]);
        let mut target = DepthImage::zeros(2, 2, 1);
        assert_eq!(
            frame.fill_depth(&mut target),
            Err(FrameError::WrongModality {
                expected: Modality::Depth,
                actual: Modality::Ir
            })
        );
    }
}
