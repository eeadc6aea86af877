use super::frame::DriverFrame;
use super::mode::OutputMode;
use crate::error::DeviceError;
use crate::stream_mode::Modality;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Closure the driver invokes, on a thread it owns, for every new frame of one stream
pub type FrameCallback = Box<dyn Fn(DriverFrame) + Send + Sync + 'static>;

/// Identity of an opened device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Stable key identifying the physical device
    pub connection_string: String,
    pub serial_number: String,
    pub vendor: String,
    pub product: String,
    pub bus: u8,
    pub address: u8,
}

/// Entry point of a vendor driver.
///
/// Passed explicitly to whoever needs devices; its lifetime belongs to the
/// application, not to the synchronizer.
pub trait DepthDriver: Send + Sync {
    /// Number of devices currently enumerated
    fn device_count(&self) -> usize;

    /// Open the device at `index` in enumeration order
    fn open_device(&self, index: usize) -> Result<Arc<dyn DepthDevice>, DeviceError>;
}

/// Capability and control surface of one opened device
pub trait DepthDevice: Send + Sync {
    fn info(&self) -> DeviceInfo;

    fn connection_string(&self) -> String {
        self.info().connection_string
    }

    /// Whether the device exposes a stream for the modality at all
    fn has_stream(&self, modality: Modality) -> bool;

    /// Whether the modality's stream can run at the given output mode
    fn is_mode_supported(&self, modality: Modality, mode: OutputMode) -> bool;

    /// Whether depth can be registered to the color viewpoint
    fn is_registration_supported(&self) -> bool;

    fn set_registration(&self, enabled: bool) -> Result<(), DeviceError>;

    fn is_registration_enabled(&self) -> bool;

    /// Start delivering frames for the modality. Starting a running stream is a no-op.
    fn start_stream(&self, modality: Modality) -> Result<(), DeviceError>;

    /// Stop delivering frames for the modality. Stopping a stopped stream is a no-op.
    fn stop_stream(&self, modality: Modality) -> Result<(), DeviceError>;

    fn is_streaming(&self, modality: Modality) -> bool;

    /// Install the callback for a modality, replacing any previous one
    fn register_callback(&self, modality: Modality, callback: FrameCallback)
        -> Result<(), DeviceError>;

    /// Drop every installed callback
    fn clear_callbacks(&self);

    fn is_connected(&self) -> bool;

    /// Block until any running stream produced a new frame, then return the
    /// latest frame of every running stream. Returns an empty vector when the
    /// timeout elapses first.
    fn wait_for_update(&self, timeout: Duration) -> Result<Vec<DriverFrame>, DeviceError>;
}
