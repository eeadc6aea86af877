use crate::device::DriverFrame;
use crate::error::FrameError;
use crate::frame::{FrameSet, Image, PixelFormat};
use crate::stream_mode::{Modality, StreamMode};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One pre-allocated frame buffer.
///
/// Guarded by its own lock so a copy-out never observes a half-written
/// frame; the readiness lock is never held while a slot is written.
pub struct BufferSlot<T> {
    contents: Mutex<SlotContents<T>>,
}

struct SlotContents<T> {
    image: Image<T>,
    frame_id: Option<u64>,
}

impl<T: Copy + Default> BufferSlot<T> {
    fn new(width: u32, height: u32, channels: usize) -> Self {
        Self {
            contents: Mutex::new(SlotContents {
                image: Image::zeros(width, height, channels),
                frame_id: None,
            }),
        }
    }

    /// Overwrite the buffer in place. The extent never changes.
    pub fn write(
        &self,
        frame_id: u64,
        fill: impl FnOnce(&mut Image<T>) -> Result<(), FrameError>,
    ) -> Result<(), FrameError> {
        let mut contents = self.contents.lock();
        fill(&mut contents.image)?;
        contents.frame_id = Some(frame_id);
        Ok(())
    }

    /// Caller-owned copy of the buffer and the id of the frame it holds
    pub fn copy_out(&self) -> (Image<T>, Option<u64>) {
        let contents = self.contents.lock();
        (contents.image.clone(), contents.frame_id)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.contents.lock().image.dimensions()
    }

    /// Id of the last frame written, if any
    pub fn frame_id(&self) -> Option<u64> {
        self.contents.lock().frame_id
    }
}

/// Mutable handle to the buffer of one (device, modality) pair
#[derive(Clone, Copy)]
pub enum BufferHandle<'a> {
    Rgb(&'a BufferSlot<u8>),
    Ir(&'a BufferSlot<u16>),
    Depth(&'a BufferSlot<f32>),
}

impl<'a> BufferHandle<'a> {
    pub fn modality(&self) -> Modality {
        match self {
            BufferHandle::Rgb(_) => Modality::Rgb,
            BufferHandle::Ir(_) => Modality::Ir,
            BufferHandle::Depth(_) => Modality::Depth,
        }
    }

    pub fn format(&self) -> PixelFormat {
        PixelFormat::for_modality(self.modality())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            BufferHandle::Rgb(slot) => slot.dimensions(),
            BufferHandle::Ir(slot) => slot.dimensions(),
            BufferHandle::Depth(slot) => slot.dimensions(),
        }
    }

    pub fn frame_id(&self) -> Option<u64> {
        match self {
            BufferHandle::Rgb(slot) => slot.frame_id(),
            BufferHandle::Ir(slot) => slot.frame_id(),
            BufferHandle::Depth(slot) => slot.frame_id(),
        }
    }

    /// Decode a driver frame into this buffer
    pub fn fill(&self, frame: &DriverFrame) -> Result<(), FrameError> {
        match self {
            BufferHandle::Rgb(slot) => slot.write(frame.frame_id, |image| frame.fill_rgb(image)),
            BufferHandle::Ir(slot) => slot.write(frame.frame_id, |image| frame.fill_ir(image)),
            BufferHandle::Depth(slot) => {
                slot.write(frame.frame_id, |image| frame.fill_depth(image))
            }
        }
    }
}

/// Buffers of one device, one per modality the device supports
pub struct DeviceBuffers {
    connection: String,
    available: StreamMode,
    rgb: Option<BufferSlot<u8>>,
    ir: Option<BufferSlot<u16>>,
    depth: Option<BufferSlot<f32>>,
}

impl DeviceBuffers {
    /// Allocate zeroed buffers for every modality in `available`
    pub fn allocate(connection: &str, available: StreamMode, width: u32, height: u32) -> Self {
        let slot = |modality: Modality| available.contains(modality);
        Self {
            connection: connection.to_string(),
            available,
            rgb: slot(Modality::Rgb).then(|| BufferSlot::new(width, height, 3)),
            ir: slot(Modality::Ir).then(|| BufferSlot::new(width, height, 1)),
            depth: slot(Modality::Depth).then(|| BufferSlot::new(width, height, 1)),
        }
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Modalities with an allocated buffer
    pub fn available(&self) -> StreamMode {
        self.available
    }

    pub fn buffer_for(&self, modality: Modality) -> Option<BufferHandle<'_>> {
        match modality {
            Modality::Rgb => self.rgb.as_ref().map(BufferHandle::Rgb),
            Modality::Ir => self.ir.as_ref().map(BufferHandle::Ir),
            Modality::Depth => self.depth.as_ref().map(BufferHandle::Depth),
        }
    }

    /// Decode a frame into the buffer of its modality
    pub fn fill(&self, frame: &DriverFrame) -> Result<(), FrameError> {
        let modality = frame.modality();
        self.buffer_for(modality)
            .ok_or_else(|| FrameError::MissingBuffer {
                modality,
                connection: self.connection.clone(),
            })?
            .fill(frame)
    }

    /// Copy out every buffer named by the set's mode
    pub fn copy_into(&self, set: &mut FrameSet) {
        let mode = set.mode;
        for modality in mode.modalities() {
            let frame_id = match modality {
                Modality::Rgb => self.rgb.as_ref().map(|slot| {
                    let (image, frame_id) = slot.copy_out();
                    set.image = Some(image);
                    frame_id
                }),
                Modality::Ir => self.ir.as_ref().map(|slot| {
                    let (image, frame_id) = slot.copy_out();
                    set.ir = Some(image);
                    frame_id
                }),
                Modality::Depth => self.depth.as_ref().map(|slot| {
                    let (image, frame_id) = slot.copy_out();
                    set.depth = Some(image);
                    frame_id
                }),
            };
            set.frame_ids[modality.index()] = frame_id.flatten();
        }
    }
}

/// Frame buffers keyed by device connection string
#[derive(Default)]
pub struct FrameBufferStore {
    devices: RwLock<HashMap<String, Arc<DeviceBuffers>>>,
}

impl FrameBufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate buffers for a device once. A second call for the same
    /// connection returns the existing buffers unchanged.
    pub fn allocate(
        &self,
        connection: &str,
        available: StreamMode,
        width: u32,
        height: u32,
    ) -> Arc<DeviceBuffers> {
        let mut devices = self.devices.write();
        if let Some(existing) = devices.get(connection) {
            if existing.available() != available {
                warn!(
                    "Buffers for {} already allocated for {}, ignoring request for {}",
                    connection,
                    existing.available(),
                    available
                );
            }
            return Arc::clone(existing);
        }

        debug!(
            "Allocating {} buffers of {}x{} for {}",
            available, width, height, connection
        );
        let buffers = Arc::new(DeviceBuffers::allocate(connection, available, width, height));
        devices.insert(connection.to_string(), Arc::clone(&buffers));
        buffers
    }

    pub fn device(&self, connection: &str) -> Option<Arc<DeviceBuffers>> {
        self.devices.read().get(connection).cloned()
    }

    /// Run `f` against the buffer of one (device, modality) pair
    pub fn with_buffer<R>(
        &self,
        connection: &str,
        modality: Modality,
        f: impl FnOnce(BufferHandle<'_>) -> R,
    ) -> Option<R> {
        let buffers = self.device(connection)?;
        let handle = buffers.buffer_for(modality)?;
        Some(f(handle))
    }

    pub fn remove(&self, connection: &str) -> Option<Arc<DeviceBuffers>> {
        self.devices.write().remove(connection)
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
