use crate::device::{OutputMode, Resolution};
use crate::stream_mode::StreamMode;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DepthcamConfig {
    pub device: DeviceConfig,
    pub sync: SyncConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Index of the device in driver enumeration order
    #[serde(default = "default_device_index")]
    pub index: u32,

    /// Resolution preset used for every stream
    #[serde(default = "default_resolution")]
    pub resolution: Resolution,

    /// Target frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Register depth to the color viewpoint when the device supports it
    #[serde(default = "default_registration")]
    pub registration: bool,

    /// Modalities to capture together, e.g. "rgb|depth"
    #[serde(default = "default_stream_mode")]
    pub stream_mode: StreamMode,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncConfig {
    /// Rendezvous timeout in milliseconds, 0 waits indefinitely
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Number of simulated devices to enumerate
    #[serde(default = "default_device_count")]
    pub device_count: u32,

    /// Whether simulated devices expose an IR stream
    #[serde(default = "default_has_ir")]
    pub has_ir: bool,

    /// Whether simulated devices support depth registration
    #[serde(default = "default_registration_supported")]
    pub registration_supported: bool,

    /// Corrupt every Nth frame of each stream, 0 disables
    #[serde(default)]
    pub drop_every_nth: u32,
}

impl DepthcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("depthcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("device.index", default_device_index())?
            .set_default("device.resolution", default_resolution().to_string())?
            .set_default("device.fps", default_fps())?
            .set_default("device.registration", default_registration())?
            .set_default("device.stream_mode", default_stream_mode().to_string())?
            .set_default("sync.poll_timeout_ms", default_poll_timeout_ms())?
            .set_default("simulator.device_count", default_device_count())?
            .set_default("simulator.has_ir", default_has_ir())?
            .set_default(
                "simulator.registration_supported",
                default_registration_supported(),
            )?
            .set_default("simulator.drop_every_nth", 0)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables such as DEPTHCAM_DEVICE__FPS=15
            .add_source(
                Environment::with_prefix("DEPTHCAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: DepthcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.fps == 0 {
            return Err(ConfigError::Message(
                "Device fps must be greater than 0".to_string(),
            ));
        }

        if self.simulator.device_count == 0 {
            return Err(ConfigError::Message(
                "Simulator device_count must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl DeviceConfig {
    /// Output mode negotiated for every stream
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from_resolution(self.resolution, self.fps)
    }
}

impl SyncConfig {
    pub fn poll_timeout(&self) -> Option<Duration> {
        match self.poll_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for DepthcamConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                index: default_device_index(),
                resolution: default_resolution(),
                fps: default_fps(),
                registration: default_registration(),
                stream_mode: default_stream_mode(),
            },
            sync: SyncConfig {
                poll_timeout_ms: default_poll_timeout_ms(),
            },
            simulator: SimulatorConfig {
                device_count: default_device_count(),
                has_ir: default_has_ir(),
                registration_supported: default_registration_supported(),
                drop_every_nth: 0,
            },
        }
    }
}

// Default value functions
fn default_device_index() -> u32 {
    0
}
fn default_resolution() -> Resolution {
    Resolution::Vga
}
fn default_fps() -> u32 {
    30
}
fn default_registration() -> bool {
    true
}
fn default_stream_mode() -> StreamMode {
    StreamMode::DEPTH_RGB
}

fn default_poll_timeout_ms() -> u64 {
    2000
}

fn default_device_count() -> u32 {
    1
}
fn default_has_ir() -> bool {
    true
}
fn default_registration_supported() -> bool {
    true
}
