use super::readiness::{ReadinessTracker, SyncPhase};
use super::stats::SyncStats;
use crate::device::DepthDevice;
use crate::error::DeviceError;
use crate::stream_mode::{Modality, StreamMode};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Owns stream start/stop on the device.
///
/// Every transition runs under `switch_lock`, so two callers can never drive
/// the device concurrently.
pub struct StreamController {
    device: Arc<dyn DepthDevice>,
    tracker: Arc<ReadinessTracker>,
    stats: Arc<SyncStats>,
    available: StreamMode,
    switch_lock: Mutex<()>,
}

impl StreamController {
    pub fn new(
        device: Arc<dyn DepthDevice>,
        tracker: Arc<ReadinessTracker>,
        stats: Arc<SyncStats>,
        available: StreamMode,
    ) -> Self {
        Self {
            device,
            tracker,
            stats,
            available,
            switch_lock: Mutex::new(()),
        }
    }

    pub fn available(&self) -> StreamMode {
        self.available
    }

    /// Switch the device to exactly the streams in `mode`.
    ///
    /// Returns `Ok(false)` when the device already runs `mode`; in that case
    /// no stream is touched and readiness keeps accumulating.
    pub fn set_requested_mode(&self, mode: StreamMode) -> Result<bool, DeviceError> {
        let _guard = self.switch_lock.lock();

        match self.tracker.phase() {
            SyncPhase::DeviceLost => return Err(self.lost()),
            SyncPhase::ShutDown => {
                return Err(DeviceError::driver("synchronizer has been shut down"))
            }
            phase => {
                let current = self.tracker.requested();
                let running = matches!(
                    (phase, mode.is_empty()),
                    (SyncPhase::AwaitingAll, false) | (SyncPhase::Idle, true)
                );
                if current == mode && running {
                    debug!("Already streaming {}, nothing to do", mode);
                    return Ok(false);
                }
            }
        }

        if !mode.is_subset_of(self.available) {
            return Err(DeviceError::ModeNotAvailable {
                requested: mode,
                available: self.available,
            });
        }

        if !self.device.is_connected() {
            return Err(self.mark_lost());
        }

        // Mask every signal and hold waiters while streams are torn down
        self.tracker.begin_switch();
        if let Err(e) = self.stop_all() {
            self.tracker.reset(StreamMode::NONE);
            return Err(e);
        }

        // Readiness clears before the first stream starts, so an early frame counts
        self.tracker.reset(mode);
        for modality in mode.modalities() {
            if let Err(e) = self.device.start_stream(modality) {
                error!("Failed to start {} stream: {}", modality, e);
                self.tracker.reset(StreamMode::NONE);
                if let Err(stop_error) = self.stop_all() {
                    warn!("Cleanup after failed start also failed: {}", stop_error);
                }
                return Err(self.classify(e));
            }
        }

        self.stats.record_mode_switch();
        info!(
            "Requested mode is now {} on {}",
            mode,
            self.device.connection_string()
        );
        Ok(true)
    }

    /// Stop every stream the device offers. Stopping a stopped stream is a no-op.
    pub fn stop_all(&self) -> Result<(), DeviceError> {
        for modality in Modality::ALL {
            if !self.available.contains(modality) {
                continue;
            }
            self.device
                .stop_stream(modality)
                .map_err(|e| self.classify(e))?;
        }
        Ok(())
    }

    /// Terminal teardown: stop streams, drop callbacks, wake every waiter
    pub fn shutdown(&self) {
        let _guard = self.switch_lock.lock();
        if matches!(self.tracker.phase(), SyncPhase::ShutDown) {
            return;
        }

        if self.device.is_connected() {
            if let Err(e) = self.stop_all() {
                warn!("Error stopping streams during shutdown: {}", e);
            }
        }
        self.device.clear_callbacks();
        self.tracker.close(SyncPhase::ShutDown);
        info!("Released device {}", self.device.connection_string());
    }

    /// Close the rendezvous with the device-lost phase and build the error
    pub fn mark_lost(&self) -> DeviceError {
        warn!("Device {} lost", self.device.connection_string());
        self.tracker.close(SyncPhase::DeviceLost);
        self.lost()
    }

    fn classify(&self, e: DeviceError) -> DeviceError {
        match e {
            DeviceError::DeviceLost { .. } => self.mark_lost(),
            other => other,
        }
    }

    fn lost(&self) -> DeviceError {
        DeviceError::DeviceLost {
            connection: self.device.connection_string(),
        }
    }
}
