use super::buffers::{DeviceBuffers, FrameBufferStore};
use super::controller::StreamController;
use super::handlers::register_handlers;
use super::readiness::{ReadinessTracker, SyncPhase, WaitTarget};
use super::stats::{SyncStats, SyncStatsSnapshot};
use crate::config::DepthcamConfig;
use crate::device::{probe_device, DepthDevice, DepthDriver, DeviceInfo, OutputMode};
use crate::error::{DeviceError, Result, SyncError};
use crate::frame::FrameSet;
use crate::stream_mode::StreamMode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest stretch a blocked poll goes without checking the device is still attached
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Parameters for opening a synchronizer
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub device_index: usize,
    /// Output mode negotiated for every stream
    pub output_mode: OutputMode,
    /// Enable depth-to-color registration when the device supports it
    pub registration: bool,
    /// Default rendezvous timeout, `None` waits indefinitely
    pub poll_timeout: Option<Duration>,
}

impl CaptureOptions {
    pub fn new(output_mode: OutputMode) -> Self {
        Self {
            device_index: 0,
            output_mode,
            registration: true,
            poll_timeout: Some(Duration::from_secs(2)),
        }
    }

    pub fn from_config(config: &DepthcamConfig) -> Self {
        Self {
            device_index: config.device.index as usize,
            output_mode: config.device.output_mode(),
            registration: config.device.registration,
            poll_timeout: config.sync.poll_timeout(),
        }
    }

    pub fn with_device_index(mut self, index: usize) -> Self {
        self.device_index = index;
        self
    }

    pub fn with_registration(mut self, registration: bool) -> Self {
        self.registration = registration;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

/// Aborts a blocked poll from another thread.
///
/// A cancel issued while no poll is blocked aborts the next one.
#[derive(Clone)]
pub struct WaitCanceller {
    tracker: Arc<ReadinessTracker>,
}

impl WaitCanceller {
    pub fn cancel(&self) {
        debug!("Cancelling rendezvous wait");
        self.tracker.cancel();
    }
}

/// Multi-stream capture synchronizer for one device.
///
/// Driver threads fill per-modality buffers and signal readiness; a single
/// consumer polls for a frame set holding exactly the requested modalities.
pub struct CaptureSynchronizer {
    device: Arc<dyn DepthDevice>,
    info: DeviceInfo,
    output_mode: OutputMode,
    store: FrameBufferStore,
    buffers: Arc<DeviceBuffers>,
    tracker: Arc<ReadinessTracker>,
    controller: StreamController,
    stats: Arc<SyncStats>,
    registration_enabled: bool,
    poll_timeout: Option<Duration>,
    shut_down: AtomicBool,
}

impl CaptureSynchronizer {
    /// Open the device at `options.device_index` and prepare it for capture.
    ///
    /// No stream is started until a mode is requested.
    pub fn open(driver: &dyn DepthDriver, options: &CaptureOptions) -> Result<Self> {
        let available = driver.device_count();
        if options.device_index >= available {
            return Err(DeviceError::IndexOutOfRange {
                index: options.device_index,
                available,
            }
            .into());
        }

        let device = driver.open_device(options.device_index)?;
        Self::from_device(device, options)
    }

    /// Take exclusive ownership of an already opened device
    pub fn from_device(device: Arc<dyn DepthDevice>, options: &CaptureOptions) -> Result<Self> {
        let info = device.info();
        if !device.is_connected() {
            return Err(DeviceError::DeviceLost {
                connection: info.connection_string,
            }
            .into());
        }

        let mode = options.output_mode;
        let report = probe_device(device.as_ref(), mode, options.registration)?;

        let store = FrameBufferStore::new();
        let buffers = store.allocate(
            &info.connection_string,
            report.available,
            mode.width,
            mode.height,
        );
        let tracker = Arc::new(ReadinessTracker::new(info.connection_string.clone()));
        let stats = Arc::new(SyncStats::new());

        register_handlers(device.as_ref(), &buffers, &tracker, &stats)?;

        let controller = StreamController::new(
            Arc::clone(&device),
            Arc::clone(&tracker),
            Arc::clone(&stats),
            report.available,
        );

        info!(
            "Opened {} ({} {}) at {}, streams available: {}",
            info.connection_string, info.vendor, info.product, mode, report.available
        );

        Ok(Self {
            device,
            info,
            output_mode: mode,
            store,
            buffers,
            tracker,
            controller,
            stats,
            registration_enabled: report.registration_enabled,
            poll_timeout: options.poll_timeout,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Switch the device to exactly the streams in `mode`.
    ///
    /// Idempotent: requesting the running mode again touches no stream and
    /// keeps readiness accumulated so far.
    pub fn request_mode(&self, mode: StreamMode) -> Result<()> {
        self.ensure_usable()?;
        self.controller.set_requested_mode(mode)?;
        Ok(())
    }

    pub fn requested_mode(&self) -> StreamMode {
        self.tracker.requested()
    }

    /// Modalities that arrived since the last release
    pub fn readiness(&self) -> StreamMode {
        self.tracker.ready()
    }

    pub fn phase(&self) -> SyncPhase {
        self.tracker.phase()
    }

    /// Block for a frame set of the requested mode, using the default timeout
    pub fn poll_latest(&self) -> Result<FrameSet> {
        self.poll_latest_timeout(self.poll_timeout)
    }

    /// Block for a frame set of the requested mode. `None` waits indefinitely.
    pub fn poll_latest_timeout(&self, timeout: Option<Duration>) -> Result<FrameSet> {
        self.ensure_usable()?;
        self.rendezvous(WaitTarget::Requested, timeout)
    }

    /// Switch to `mode` if needed, then block for a frame set of it.
    ///
    /// Fails with `ModeChanged` if another caller switches modes first.
    pub fn await_and_collect(&self, mode: StreamMode, timeout: Option<Duration>) -> Result<FrameSet> {
        self.request_mode(mode)?;
        self.rendezvous(WaitTarget::Exact(mode), timeout)
    }

    pub fn canceller(&self) -> WaitCanceller {
        WaitCanceller {
            tracker: Arc::clone(&self.tracker),
        }
    }

    pub fn stats(&self) -> SyncStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    /// Modalities with an allocated buffer, the widest mode that may be requested
    pub fn available_modes(&self) -> StreamMode {
        self.controller.available()
    }

    pub fn registration_enabled(&self) -> bool {
        self.registration_enabled
    }

    /// Stop every stream and release the device. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.controller.shutdown();
        self.store.remove(&self.info.connection_string);
        debug!(
            "Capture synchronizer for {} shut down, {:?}",
            self.info.connection_string,
            self.stats.snapshot()
        );
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.tracker.phase() {
            SyncPhase::ShutDown => Err(SyncError::ShutDown.into()),
            SyncPhase::DeviceLost => Err(SyncError::DeviceLost {
                connection: self.info.connection_string.clone(),
            }
            .into()),
            SyncPhase::Idle | SyncPhase::AwaitingAll => {
                if !self.device.is_connected() {
                    self.controller.mark_lost();
                    return Err(SyncError::DeviceLost {
                        connection: self.info.connection_string.clone(),
                    }
                    .into());
                }
                Ok(())
            }
        }
    }

    fn rendezvous(&self, target: WaitTarget, timeout: Option<Duration>) -> Result<FrameSet> {
        let started = Instant::now();
        let deadline = timeout.map(|timeout| started + timeout);

        // Waits are sliced so a disconnect is noticed even with no deadline
        loop {
            let slice = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(LIVENESS_CHECK_INTERVAL),
                None => LIVENESS_CHECK_INTERVAL,
            };

            match self
                .tracker
                .await_ready(target, Some(slice), |mode| self.copy_out(mode))
            {
                Ok(set) => return Ok(set),
                Err(SyncError::Timeout { mode, ready, .. }) => {
                    if !self.device.is_connected() {
                        self.controller.mark_lost();
                        continue;
                    }
                    if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                        self.stats.record_timeout();
                        let waited = started.elapsed();
                        warn!(
                            "No complete {} frame set after {:?}, ready: {}",
                            mode, waited, ready
                        );
                        return Err(SyncError::Timeout {
                            mode,
                            ready,
                            waited,
                        }
                        .into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs under the readiness lock
    fn copy_out(&self, mode: StreamMode) -> FrameSet {
        let mut set = FrameSet::new(mode, self.stats.record_release());
        self.buffers.copy_into(&mut set);
        set
    }
}

impl Drop for CaptureSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
