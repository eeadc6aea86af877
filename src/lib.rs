pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod polling;
pub mod stream_mode;
pub mod sync;

pub use config::DepthcamConfig;
pub use device::{DepthDevice, DepthDriver, DeviceInfo, DriverFrame, OutputMode, Resolution};
pub use error::{DepthcamError, DeviceError, FrameError, Result, SyncError};
pub use frame::{DepthImage, FrameSet, Image, IrImage, PixelFormat, RawDepthImage, RgbImage};
pub use polling::{PollingCapture, RawCapture};
pub use stream_mode::{Modality, StreamMode};
pub use sync::{
    CaptureOptions, CaptureSynchronizer, SyncPhase, SyncStatsSnapshot, WaitCanceller,
};
