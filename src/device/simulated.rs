use super::driver::{DepthDevice, DepthDriver, DeviceInfo, FrameCallback};
use super::frame::{DriverFrame, FramePayload};
use super::mock::{synthetic_frame, MockDevice};
use super::mode::OutputMode;
use crate::config::SimulatorConfig;
use crate::error::DeviceError;
use crate::stream_mode::{Modality, StreamMode};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Producer thread feeding one stream
struct Producer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Device whose streams are fed by background threads at the configured frame rate
pub struct SimulatedDevice {
    inner: Arc<MockDevice>,
    mode: OutputMode,
    drop_every_nth: u32,
    producers: Mutex<[Option<Producer>; 3]>,
}

impl SimulatedDevice {
    pub fn new(inner: Arc<MockDevice>, mode: OutputMode, drop_every_nth: u32) -> Self {
        Self {
            inner,
            mode,
            drop_every_nth,
            producers: Mutex::new([None, None, None]),
        }
    }

    fn spawn_producer(&self, modality: Modality) -> Result<Producer, DeviceError> {
        let (stop, stop_rx) = channel::bounded::<()>(1);
        let device = Arc::clone(&self.inner);
        let interval = self.mode.frame_interval();
        let (width, height) = self.mode.dimensions();
        let drop_every_nth = self.drop_every_nth as u64;
        let started = Instant::now();

        let handle = std::thread::Builder::new()
            .name(format!("sim-{}", modality.name().to_lowercase()))
            .spawn(move || {
                let mut frame_id = 0u64;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    frame_id += 1;
                    let mut frame = synthetic_frame(modality, frame_id, width, height)
                        .with_timestamp(started.elapsed());
                    if drop_every_nth > 0 && frame_id % drop_every_nth == 0 {
                        trace!("Corrupting simulated {} frame {}", modality, frame_id);
                        truncate_payload(&mut frame);
                    }
                    device.emit_frame(frame);
                }
                debug!("Simulated {} producer stopped after {} frames", modality, frame_id);
            })
            .map_err(|e| DeviceError::driver(format!("Failed to spawn producer: {}", e)))?;

        Ok(Producer { stop, handle })
    }

    fn stop_producer(&self, modality: Modality) {
        let producer = self.producers.lock()[modality.index()].take();
        if let Some(producer) = producer {
            let _ = producer.stop.send(());
            if producer.handle.join().is_err() {
                error!("Simulated {} producer panicked", modality);
            }
        }
    }
}

/// Drop half of the payload so the frame can no longer be decoded
fn truncate_payload(frame: &mut DriverFrame) {
    match &mut frame.payload {
        FramePayload::Rgb24(data) => data.truncate(data.len() / 2),
        FramePayload::Ir16(data) => data.truncate(data.len() / 2),
        FramePayload::DepthMillimeters { samples, .. } => samples.truncate(samples.len() / 2),
    }
}

impl DepthDevice for SimulatedDevice {
    fn info(&self) -> DeviceInfo {
        self.inner.info()
    }

    fn has_stream(&self, modality: Modality) -> bool {
        self.inner.has_stream(modality)
    }

    fn is_mode_supported(&self, modality: Modality, mode: OutputMode) -> bool {
        self.inner.is_mode_supported(modality, mode)
    }

    fn is_registration_supported(&self) -> bool {
        self.inner.is_registration_supported()
    }

    fn set_registration(&self, enabled: bool) -> Result<(), DeviceError> {
        self.inner.set_registration(enabled)
    }

    fn is_registration_enabled(&self) -> bool {
        self.inner.is_registration_enabled()
    }

    fn start_stream(&self, modality: Modality) -> Result<(), DeviceError> {
        self.inner.start_stream(modality)?;
        let mut producers = self.producers.lock();
        if producers[modality.index()].is_none() {
            producers[modality.index()] = Some(self.spawn_producer(modality)?);
        }
        Ok(())
    }

    fn stop_stream(&self, modality: Modality) -> Result<(), DeviceError> {
        self.stop_producer(modality);
        self.inner.stop_stream(modality)
    }

    fn is_streaming(&self, modality: Modality) -> bool {
        self.inner.is_streaming(modality)
    }

    fn register_callback(
        &self,
        modality: Modality,
        callback: FrameCallback,
    ) -> Result<(), DeviceError> {
        self.inner.register_callback(modality, callback)
    }

    fn clear_callbacks(&self) {
        self.inner.clear_callbacks()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn wait_for_update(&self, timeout: Duration) -> Result<Vec<DriverFrame>, DeviceError> {
        self.inner.wait_for_update(timeout)
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        for modality in Modality::ALL {
            self.stop_producer(modality);
        }
    }
}

/// Driver enumerating simulated devices
pub struct SimulatedDriver {
    devices: Vec<Arc<SimulatedDevice>>,
}

impl SimulatedDriver {
    /// Build the configured number of devices, each producing frames at `mode`
    pub fn from_config(config: &SimulatorConfig, mode: OutputMode) -> Self {
        let mut streams = StreamMode::RGB | StreamMode::DEPTH;
        if config.has_ir {
            streams.insert(Modality::Ir);
        }

        let devices = (0..config.device_count)
            .map(|index| {
                let inner = MockDevice::builder()
                    .connection_string(format!("sim://{}", index))
                    .streams(streams)
                    .registration_supported(config.registration_supported)
                    .frame_size(mode.width, mode.height)
                    .build();
                Arc::new(SimulatedDevice::new(inner, mode, config.drop_every_nth))
            })
            .collect::<Vec<_>>();

        info!(
            "Simulated driver with {} device(s) producing {} ({})",
            devices.len(),
            streams,
            mode
        );

        Self { devices }
    }
}

impl DepthDriver for SimulatedDriver {
    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn open_device(&self, index: usize) -> Result<Arc<dyn DepthDevice>, DeviceError> {
        let device = self
            .devices
            .get(index)
            .ok_or(DeviceError::IndexOutOfRange {
                index,
                available: self.devices.len(),
            })?;
        Ok(Arc::clone(device) as Arc<dyn DepthDevice>)
    }
}
