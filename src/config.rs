use crate::source::{AcquireRequest, CameraFacing};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QrScanConfig {
    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera device path (e.g., /dev/video0). Use a stub:// path to force
    /// the synthetic camera.
    #[serde(default = "default_camera_device")]
    pub device: String,

    /// Preferred camera facing; a hint for providers that can tell
    #[serde(default = "default_camera_facing")]
    pub facing: CameraFacing,

    /// Ideal capture width in pixels
    #[serde(default = "default_ideal_width")]
    pub ideal_width: u32,

    /// Ideal capture height in pixels
    #[serde(default = "default_ideal_height")]
    pub ideal_height: u32,

    /// Frames per second requested from the device
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Polls the synthetic camera reports not-ready before its first frame
    #[serde(default = "default_stub_warmup_frames")]
    pub stub_warmup_frames: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    /// Scheduling ticks per second for the scan poll loop.
    ///
    /// One decode attempt runs per tick, so higher rates lower decode
    /// latency and raise CPU use. Unlike a display-driven loop this rate is
    /// fixed and does not pause when nothing is watching.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    /// Path of the JSON scan history file
    #[serde(default = "default_history_path")]
    pub path: String,

    /// Maximum number of history entries retained, newest first
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl QrScanConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("qrscan.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.device", default_camera_device())?
            .set_default("camera.facing", "rear")?
            .set_default("camera.ideal_width", default_ideal_width())?
            .set_default("camera.ideal_height", default_ideal_height())?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.stub_warmup_frames", default_stub_warmup_frames())?
            .set_default("scanner.tick_hz", default_tick_hz())?
            .set_default("history.path", default_history_path())?
            .set_default("history.capacity", default_history_capacity() as i64)?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with QRSCAN_ prefix
            .add_source(Environment::with_prefix("QRSCAN").separator("__"))
            .build()?;

        let config: QrScanConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.device.is_empty() {
            return Err(ConfigError::Message(
                "Camera device must not be empty".to_string(),
            ));
        }

        if self.camera.ideal_width == 0 || self.camera.ideal_height == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.scanner.tick_hz == 0 || self.scanner.tick_hz > 240 {
            return Err(ConfigError::Message(
                "Scanner tick_hz must be between 1 and 240".to_string(),
            ));
        }

        if self.history.capacity == 0 {
            return Err(ConfigError::Message(
                "History capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The acquire request the scan session should use.
    pub fn acquire_request(&self) -> AcquireRequest {
        AcquireRequest {
            facing: self.camera.facing,
            ideal_width: self.camera.ideal_width,
            ideal_height: self.camera.ideal_height,
        }
    }
}

impl Default for QrScanConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            scanner: ScannerConfig::default(),
            history: HistoryConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_camera_device(),
            facing: default_camera_facing(),
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            fps: default_camera_fps(),
            stub_warmup_frames: default_stub_warmup_frames(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            capacity: default_history_capacity(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_camera_facing() -> CameraFacing {
    CameraFacing::Rear
}
fn default_ideal_width() -> u32 {
    1280
}
fn default_ideal_height() -> u32 {
    720
}
fn default_camera_fps() -> u32 {
    30
}
fn default_stub_warmup_frames() -> u32 {
    3
}

fn default_tick_hz() -> u32 {
    30
}

fn default_history_path() -> String {
    "qrscan_history.json".to_string()
}
fn default_history_capacity() -> usize {
    10
}

fn default_event_bus_capacity() -> usize {
    100
}
