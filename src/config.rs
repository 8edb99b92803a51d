//! Run-wide configuration combining discovery, bridge and display settings.
//!
//! # Examples
//!
//! ```rust
//! use muselive::config::Config;
//! use std::time::Duration;
//!
//! let config = Config::default()
//!     .with_adapter("hci0".to_string())
//!     .with_window(Duration::from_secs(10));
//! assert_eq!(config.device.adapter.as_deref(), Some("hci0"));
//! assert_eq!(config.bridge.adapter.as_deref(), Some("hci0"));
//! ```

use std::time::Duration;

use crate::{
    bridge::BridgeConfig,
    device::DeviceConfig,
    error::{Error, Result},
};

/// Longest plot window accepted.
pub const MAX_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct Config {
    /// Headset discovery settings.
    pub device: DeviceConfig,
    /// Streaming bridge settings.
    pub bridge: BridgeConfig,
    /// How long to wait for the EEG stream to be advertised. Default: 5 seconds.
    pub resolve_timeout: Duration,
    /// Span of history shown by the plot. Default: 5 seconds.
    pub window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            bridge: BridgeConfig::default(),
            resolve_timeout: Duration::from_secs(5),
            window: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Uses the named Bluetooth adapter for both discovery and streaming.
    pub fn with_adapter(mut self, adapter: String) -> Self {
        self.bridge.adapter = Some(adapter.clone());
        self.device = self.device.with_adapter(adapter);
        self
    }

    pub fn with_name_filter(mut self, name: String) -> Self {
        self.device = self.device.with_name_filter(name);
        self
    }

    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.device = self.device.with_scan_timeout(scan_timeout);
        self
    }

    pub fn with_stream_name(mut self, stream_name: String) -> Self {
        self.bridge.stream_name = stream_name;
        self
    }

    pub fn with_preset(mut self, preset: u8) -> Self {
        self.bridge.preset = Some(preset);
        self
    }

    pub fn with_data_timeout(mut self, data_timeout: Duration) -> Self {
        self.bridge.data_timeout = data_timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, resolve_timeout: Duration) -> Self {
        self.resolve_timeout = resolve_timeout;
        self
    }

    /// Updates the plot window. Its sample capacity is derived from the
    /// stream's sampling rate once connected.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Checks that the plot window is non-empty and at most `MAX_WINDOW`.
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() || self.window > MAX_WINDOW {
            return Err(Error::InvalidConfig(format!(
                "window must be between 0 and {}s, got {:.3}s",
                MAX_WINDOW.as_secs(),
                self.window.as_secs_f64()
            )));
        }
        Ok(())
    }
}
