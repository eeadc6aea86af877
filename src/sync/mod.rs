mod buffers;
mod controller;
mod handlers;
mod readiness;
mod stats;
mod synchronizer;

pub use buffers::{BufferHandle, BufferSlot, DeviceBuffers, FrameBufferStore};
pub use controller::StreamController;
pub use handlers::{register_handlers, FrameHandler};
pub use readiness::{ReadinessTracker, SignalOutcome, SyncPhase, WaitTarget};
pub use stats::{SyncStats, SyncStatsSnapshot};
pub use synchronizer::{CaptureOptions, CaptureSynchronizer, WaitCanceller};
