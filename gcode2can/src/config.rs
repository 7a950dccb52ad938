/*!
Configuration management for the converter and sender.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol::{DEFAULT_ACCELERATION, DEFAULT_BITRATE, DEFAULT_SPEED};
use shared::{AxisTable, EncoderSettings, PacingPolicy, SendOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub encoder: EncoderConfig,
    pub transmit: TransmitConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            transmit: TransmitConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            info!("Using configuration from {}", path.as_ref().display());
            Self::load_from_file(path)
        } else {
            info!("No configuration at {}, using defaults", path.as_ref().display());
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoder specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Gear ratio per axis in X, Y, Z, A, B, C order
    pub gear_ratios: Vec<f64>,

    /// Speed for lines without a feedrate
    pub default_speed: u16,

    /// Acceleration byte sent with every frame
    pub acceleration: u8,
}

impl EncoderConfig {
    /// Validate and turn into encoder settings
    pub fn to_settings(&self) -> shared::Result<EncoderSettings> {
        let settings = EncoderSettings {
            axes: AxisTable::new(&self.gear_ratios)?,
            default_speed: self.default_speed,
            acceleration: self.acceleration,
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            gear_ratios: AxisTable::DEFAULT_RATIOS.to_vec(),
            default_speed: DEFAULT_SPEED,
            acceleration: DEFAULT_ACCELERATION,
        }
    }
}

/// Sender specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitConfig {
    /// Serial device of the slcan adapter
    pub device: String,

    /// CAN bus bitrate
    pub bitrate: u32,

    /// Serial line speed towards the adapter
    pub serial_baud: u32,

    /// Seconds to wait for a motor reply after each frame, 0 to not wait
    pub timeout_seconds: f64,

    /// Pause between frames in milliseconds
    pub inter_frame_delay_ms: u64,

    /// Send to an in-memory bus instead of the device
    pub use_virtual: bool,
}

impl TransmitConfig {
    /// Validated pacing; rejects timeouts that do not fit a `Duration`
    pub fn pacing(&self) -> shared::Result<PacingPolicy> {
        Ok(PacingPolicy::from_timeout_secs(self.timeout_seconds)?
            .with_inter_frame_delay(Duration::from_millis(self.inter_frame_delay_ms)))
    }

    pub fn send_options(&self) -> shared::Result<SendOptions> {
        Ok(SendOptions {
            device: self.device.clone(),
            bitrate: self.bitrate,
            pacing: self.pacing()?,
        })
    }
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyACM0".to_string(),
            bitrate: DEFAULT_BITRATE,
            serial_baud: 115_200,
            timeout_seconds: 3.0,
            inter_frame_delay_ms: 0,
            use_virtual: false,
        }
    }
}
