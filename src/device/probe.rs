use super::driver::DepthDevice;
use super::mode::OutputMode;
use crate::error::DeviceError;
use crate::stream_mode::{Modality, StreamMode};
use tracing::{debug, info, warn};

/// Outcome of probing an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Modalities the device exposes at the probed output mode
    pub available: StreamMode,
    /// Whether depth-to-color registration ended up enabled
    pub registration_enabled: bool,
}

/// Whether the device exposes the modality and can run it at `mode`
pub fn is_supported(device: &dyn DepthDevice, modality: Modality, mode: OutputMode) -> bool {
    device.has_stream(modality) && device.is_mode_supported(modality, mode)
}

/// Validate every modality the device claims to expose against `mode`.
///
/// Image and IR streams are optional, but when present they must support the
/// mode. Depth is mandatory. Registration is enabled only when requested and
/// supported; failing to enable it never fails the probe.
pub fn probe_device(
    device: &dyn DepthDevice,
    mode: OutputMode,
    registration: bool,
) -> Result<ProbeReport, DeviceError> {
    let mut available = StreamMode::NONE;

    for modality in [Modality::Rgb, Modality::Ir] {
        if !device.has_stream(modality) {
            debug!("Device has no {} stream", modality);
            continue;
        }
        if !device.is_mode_supported(modality, mode) {
            return Err(unsupported(modality, mode));
        }
        available.insert(modality);
    }

    if !device.has_stream(Modality::Depth) {
        return Err(DeviceError::MissingModality {
            modality: Modality::Depth,
        });
    }
    if !device.is_mode_supported(Modality::Depth, mode) {
        return Err(unsupported(Modality::Depth, mode));
    }
    available.insert(Modality::Depth);

    let registration_enabled = if registration {
        enable_registration(device, available)
    } else {
        false
    };

    info!(
        "Device {} supports {} at {} (registration: {})",
        device.connection_string(),
        available,
        mode,
        registration_enabled
    );

    Ok(ProbeReport {
        available,
        registration_enabled,
    })
}

fn enable_registration(device: &dyn DepthDevice, available: StreamMode) -> bool {
    if !available.contains(Modality::Rgb) || !device.is_registration_supported() {
        warn!("Depth registration is not supported by this device");
        return false;
    }
    match device.set_registration(true) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to enable depth registration, continuing without: {}", e);
            false
        }
    }
}

fn unsupported(modality: Modality, mode: OutputMode) -> DeviceError {
    DeviceError::UnsupportedMode {
        modality,
        width: mode.width,
        height: mode.height,
        fps: mode.fps,
    }
}
