mod driver;
mod frame;
mod mock;
mod mode;
mod probe;
#[cfg(feature = "simulator")]
mod simulated;
#[cfg(test)]
mod tests;

pub use driver::{DepthDevice, DepthDriver, DeviceInfo, FrameCallback};
pub use frame::{DriverFrame, FramePayload};
pub use mock::{synthetic_frame, MockDevice, MockDeviceBuilder, MockDriver, StreamCommand};
pub use mode::{OutputMode, Resolution};
pub use probe::{is_supported, probe_device, ProbeReport};
#[cfg(feature = "simulator")]
pub use simulated::{SimulatedDevice, SimulatedDriver};
