use super::buffers::DeviceBuffers;
use super::readiness::{ReadinessTracker, SignalOutcome};
use super::stats::SyncStats;
use crate::device::{DepthDevice, DriverFrame, FrameCallback};
use crate::error::DeviceError;
use crate::stream_mode::Modality;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Callback handler for one (device, modality) pair.
///
/// Writes each arriving frame into its own buffer, then signals readiness.
/// Handlers of different modalities share no buffer and may run concurrently.
pub struct FrameHandler {
    modality: Modality,
    buffers: Arc<DeviceBuffers>,
    tracker: Arc<ReadinessTracker>,
    stats: Arc<SyncStats>,
}

impl FrameHandler {
    pub fn new(
        modality: Modality,
        buffers: Arc<DeviceBuffers>,
        tracker: Arc<ReadinessTracker>,
        stats: Arc<SyncStats>,
    ) -> Self {
        Self {
            modality,
            buffers,
            tracker,
            stats,
        }
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Entry point for the driver thread. Never waits on the rendezvous and
    /// never unwinds into the driver.
    pub fn handle(&self, frame: DriverFrame) {
        let frame_id = frame.frame_id;
        if panic::catch_unwind(AssertUnwindSafe(|| self.process(&frame))).is_err() {
            error!(
                "{} handler panicked on frame {} of {}, frame dropped",
                self.modality,
                frame_id,
                self.buffers.connection()
            );
            self.stats.record_dropped();
        }
    }

    fn process(&self, frame: &DriverFrame) {
        if frame.modality() != self.modality {
            debug!(
                "{} handler received a {} frame, dropping",
                self.modality,
                frame.modality()
            );
            self.stats.record_dropped();
            return;
        }

        // A buffer outside the requested mode keeps its previous contents
        if !self.tracker.accepts(self.modality) {
            self.record_late(frame);
            return;
        }

        if let Err(e) = self.buffers.fill(frame) {
            debug!("Dropping {} frame {}: {}", self.modality, frame.frame_id, e);
            self.stats.record_dropped();
            return;
        }
        self.stats.record_frame(self.modality);

        match self.tracker.signal(self.modality) {
            SignalOutcome::Accepted => {
                trace!("{} frame {} buffered", self.modality, frame.frame_id);
            }
            SignalOutcome::Coalesced => {
                debug!(
                    "{} fired again before copy-out, buffer now holds frame {}",
                    self.modality, frame.frame_id
                );
                self.stats.record_coalesced();
            }
            SignalOutcome::Masked => self.record_late(frame),
        }
    }

    fn record_late(&self, frame: &DriverFrame) {
        trace!(
            "{} frame {} arrived outside the requested mode",
            self.modality,
            frame.frame_id
        );
        self.stats.record_late();
    }

    pub fn into_callback(self) -> FrameCallback {
        Box::new(move |frame| self.handle(frame))
    }
}

/// Install one handler per buffered modality on the device
pub fn register_handlers(
    device: &dyn DepthDevice,
    buffers: &Arc<DeviceBuffers>,
    tracker: &Arc<ReadinessTracker>,
    stats: &Arc<SyncStats>,
) -> Result<(), DeviceError> {
    for modality in buffers.available().modalities() {
        let handler = FrameHandler::new(
            modality,
            Arc::clone(buffers),
            Arc::clone(tracker),
            Arc::clone(stats),
        );
        device.register_callback(modality, handler.into_callback())?;
        debug!("Registered {} callback on {}", modality, buffers.connection());
    }
    Ok(())
}
