use super::driver::{DepthDevice, DepthDriver, DeviceInfo, FrameCallback};
use super::frame::DriverFrame;
use super::mode::OutputMode;
use crate::error::DeviceError;
use crate::stream_mode::{Modality, StreamMode};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Stream control command recorded by a [`MockDevice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    Start(Modality),
    Stop(Modality),
}

/// In-process fake device firing synthetic frames on demand
pub struct MockDevice {
    info: DeviceInfo,
    streams: StreamMode,
    supported: Option<HashSet<(Modality, OutputMode)>>,
    rejected: HashSet<(Modality, OutputMode)>,
    registration_supported: bool,
    frame_size: (u32, u32),
    streaming: Mutex<StreamMode>,
    registration: AtomicBool,
    connected: AtomicBool,
    callbacks: RwLock<[Option<Arc<FrameCallback>>; 3]>,
    commands: Mutex<Vec<StreamCommand>>,
    frame_counters: [AtomicU64; 3],
    updates: Mutex<UpdateState>,
    update_signal: Condvar,
}

#[derive(Default)]
struct UpdateState {
    generation: u64,
    latest: [Option<DriverFrame>; 3],
}

/// Builder for [`MockDevice`]
pub struct MockDeviceBuilder {
    connection_string: String,
    streams: StreamMode,
    supported: Option<HashSet<(Modality, OutputMode)>>,
    rejected: HashSet<(Modality, OutputMode)>,
    registration_supported: bool,
    frame_size: (u32, u32),
}

impl MockDeviceBuilder {
    pub fn new() -> Self {
        Self {
            connection_string: "mock://0".to_string(),
            streams: StreamMode::RGB | StreamMode::IR | StreamMode::DEPTH,
            supported: None,
            rejected: HashSet::new(),
            registration_supported: true,
            frame_size: (8, 6),
        }
    }

    pub fn connection_string<S: Into<String>>(mut self, connection: S) -> Self {
        self.connection_string = connection.into();
        self
    }

    /// Streams the device exposes
    pub fn streams(mut self, streams: StreamMode) -> Self {
        self.streams = streams;
        self
    }

    /// Restrict support to explicitly listed modes. Without any listed mode, every mode is supported.
    pub fn supported_mode(mut self, modality: Modality, mode: OutputMode) -> Self {
        self.supported
            .get_or_insert_with(HashSet::new)
            .insert((modality, mode));
        self
    }

    /// Reject one mode for one modality
    pub fn reject_mode(mut self, modality: Modality, mode: OutputMode) -> Self {
        self.rejected.insert((modality, mode));
        self
    }

    pub fn registration_supported(mut self, supported: bool) -> Self {
        self.registration_supported = supported;
        self
    }

    /// Extent of frames produced by [`MockDevice::emit`]
    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = (width, height);
        self
    }

    pub fn build(self) -> Arc<MockDevice> {
        let serial = self
            .connection_string
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        Arc::new(MockDevice {
            info: DeviceInfo {
                connection_string: self.connection_string,
                serial_number: serial,
                vendor: "Mock".to_string(),
                product: "Mock Depth Sensor".to_string(),
                bus: 1,
                address: 1,
            },
            streams: self.streams,
            supported: self.supported,
            rejected: self.rejected,
            registration_supported: self.registration_supported,
            frame_size: self.frame_size,
            streaming: Mutex::new(StreamMode::NONE),
            registration: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            callbacks: RwLock::new([None, None, None]),
            commands: Mutex::new(Vec::new()),
            frame_counters: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            updates: Mutex::new(UpdateState::default()),
            update_signal: Condvar::new(),
        })
    }
}

impl Default for MockDeviceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn builder() -> MockDeviceBuilder {
        MockDeviceBuilder::new()
    }

    /// Every start/stop command received so far, in order
    pub fn commands(&self) -> Vec<StreamCommand> {
        self.commands.lock().clone()
    }

    pub fn clear_commands(&self) {
        self.commands.lock().clear();
    }

    pub fn start_count(&self, modality: Modality) -> usize {
        self.count_commands(StreamCommand::Start(modality))
    }

    pub fn stop_count(&self, modality: Modality) -> usize {
        self.count_commands(StreamCommand::Stop(modality))
    }

    fn count_commands(&self, command: StreamCommand) -> usize {
        self.commands.lock().iter().filter(|c| **c == command).count()
    }

    /// Modes currently streaming
    pub fn streaming(&self) -> StreamMode {
        *self.streaming.lock()
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    /// Fire a synthetic frame for a running stream.
    ///
    /// Returns false without delivering anything when the stream is stopped
    /// or the device is disconnected.
    pub fn emit(&self, modality: Modality) -> bool {
        let frame_id = self.frame_counters[modality.index()].fetch_add(1, Ordering::Relaxed) + 1;
        let (width, height) = self.frame_size;
        self.emit_frame(synthetic_frame(modality, frame_id, width, height))
    }

    /// Fire a caller-built frame for a running stream
    pub fn emit_frame(&self, frame: DriverFrame) -> bool {
        if !self.is_connected() || !self.streaming.lock().contains(frame.modality()) {
            trace!(
                "Mock device {} not streaming {}, frame {} discarded",
                self.info.connection_string,
                frame.modality(),
                frame.frame_id
            );
            return false;
        }
        self.deliver(frame);
        true
    }

    /// Deliver a frame regardless of stream state, as a frame already in
    /// flight when its stream was stopped would be.
    pub fn deliver(&self, frame: DriverFrame) {
        let modality = frame.modality();
        {
            let mut updates = self.updates.lock();
            updates.generation += 1;
            updates.latest[modality.index()] = Some(frame.clone());
        }
        self.update_signal.notify_all();

        let callback = self.callbacks.read()[modality.index()].clone();
        if let Some(callback) = callback {
            (callback.as_ref())(frame);
        }
    }

    /// Simulate the device being unplugged
    pub fn disconnect(&self) {
        debug!("Mock device {} disconnected", self.info.connection_string);
        self.connected.store(false, Ordering::SeqCst);
        *self.streaming.lock() = StreamMode::NONE;
        let _updates = self.updates.lock();
        self.update_signal.notify_all();
    }

    fn ensure_connected(&self) -> Result<(), DeviceError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DeviceError::DeviceLost {
                connection: self.info.connection_string.clone(),
            })
        }
    }
}

impl DepthDevice for MockDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn has_stream(&self, modality: Modality) -> bool {
        self.streams.contains(modality)
    }

    fn is_mode_supported(&self, modality: Modality, mode: OutputMode) -> bool {
        if !self.has_stream(modality) || self.rejected.contains(&(modality, mode)) {
            return false;
        }
        match &self.supported {
            Some(supported) => supported.contains(&(modality, mode)),
            None => true,
        }
    }

    fn is_registration_supported(&self) -> bool {
        self.registration_supported
    }

    fn set_registration(&self, enabled: bool) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if enabled && !self.registration_supported {
            return Err(DeviceError::driver("depth registration not supported"));
        }
        self.registration.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn is_registration_enabled(&self) -> bool {
        self.registration.load(Ordering::SeqCst)
    }

    fn start_stream(&self, modality: Modality) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        if !self.has_stream(modality) {
            return Err(DeviceError::MissingModality { modality });
        }
        self.commands.lock().push(StreamCommand::Start(modality));
        self.streaming.lock().insert(modality);
        Ok(())
    }

    fn stop_stream(&self, modality: Modality) -> Result<(), DeviceError> {
        self.ensure_connected()?;
        self.commands.lock().push(StreamCommand::Stop(modality));
        let mut streaming = self.streaming.lock();
        *streaming = streaming.missing_from(modality.into());
        Ok(())
    }

    fn is_streaming(&self, modality: Modality) -> bool {
        self.streaming.lock().contains(modality)
    }

    fn register_callback(
        &self,
        modality: Modality,
        callback: FrameCallback,
    ) -> Result<(), DeviceError> {
        if !self.has_stream(modality) {
            return Err(DeviceError::MissingModality { modality });
        }
        self.callbacks.write()[modality.index()] = Some(Arc::new(callback));
        Ok(())
    }

    fn clear_callbacks(&self) {
        *self.callbacks.write() = [None, None, None];
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn wait_for_update(&self, timeout: Duration) -> Result<Vec<DriverFrame>, DeviceError> {
        self.ensure_connected()?;

        let mut updates = self.updates.lock();
        let generation = updates.generation;
        let deadline = std::time::Instant::now() + timeout;
        while updates.generation == generation {
            if self
                .update_signal
                .wait_until(&mut updates, deadline)
                .timed_out()
            {
                break;
            }
            self.ensure_connected()?;
        }

        if updates.generation == generation {
            return Ok(Vec::new());
        }

        let streaming = *self.streaming.lock();
        Ok(updates
            .latest
            .iter()
            .flatten()
            .filter(|frame| streaming.contains(frame.modality()))
            .cloned()
            .collect())
    }
}

/// Frame filled with a value derived from its id, so tests can tell frames apart.
///
/// RGB bytes hold `frame_id % 256`, IR samples hold `frame_id`, depth samples
/// hold `500 + frame_id` millimetres.
pub fn synthetic_frame(modality: Modality, frame_id: u64, width: u32, height: u32) -> DriverFrame {
    let pixels = width as usize * height as usize;
    let timestamp = Duration::from_millis(frame_id * 33);
    let frame = match modality {
        Modality::Rgb => DriverFrame::rgb(
            frame_id,
            width,
            height,
            vec![(frame_id % 256) as u8; pixels * 3],
        ),
        Modality::Ir => DriverFrame::ir(frame_id, width, height, vec![frame_id as u16; pixels]),
        Modality::Depth => DriverFrame::depth(
            frame_id,
            width,
            height,
            vec![500u16.wrapping_add(frame_id as u16); pixels],
        ),
    };
    frame.with_timestamp(timestamp)
}

/// Fake driver enumerating a fixed set of mock devices
pub struct MockDriver {
    devices: Vec<Arc<MockDevice>>,
}

impl MockDriver {
    pub fn new(devices: Vec<Arc<MockDevice>>) -> Self {
        Self { devices }
    }

    pub fn with_device(device: Arc<MockDevice>) -> Self {
        Self::new(vec![device])
    }

    pub fn device(&self, index: usize) -> Option<Arc<MockDevice>> {
        self.devices.get(index).cloned()
    }
}

impl DepthDriver for MockDriver {
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
