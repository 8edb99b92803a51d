//! Provides functionality to configure Bluetooth discovery of Muse headsets.
//! It includes a `DeviceConfig` struct for specifying the bluetooth adapter,
//! the advertised-name filter and the scan window, the `DeviceDescriptor`
//! produced for every matching headset, and the `DeviceDiscovery` trait the
//! acquisition phase is written against.
//!
//! # Examples
//!
//! ```rust,no_run
//! use muselive::device::{DeviceConfig, DeviceDiscovery};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> muselive::Result<()> {
//!     let config = DeviceConfig::default()
//!         .with_adapter("hci0".to_string())
//!         .with_scan_timeout(Duration::from_secs(5));
//!
//!     for device in config.list_devices().await? {
//!         println!("{} ({})", device.name, device.address);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Methods in this module may return errors related to Bluetooth session
//! creation, adapter retrieval and starting discovery. These are propagated
//! as `Error::Bluetooth`. Failures while querying a single device only skip
//! that device.

use std::future::Future;
use std::time::Duration;

use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::{StreamExt, pin_mut};
use tokio::time::{Instant, timeout_at};

use crate::error::Result;

/// A discovered headset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Advertised name, e.g. "Muse-1A2B"
    pub name: String,
    /// Bluetooth address the bridge connects to
    pub address: Address,
}

/// Anything that can list nearby headsets.
pub trait DeviceDiscovery {
    /// Lists the headsets currently in range, in discovery order.
    fn list_devices(&self) -> impl Future<Output = Result<Vec<DeviceDescriptor>>>;
}

/// Configuration for discovering Muse headsets over Bluetooth.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// The name of the Bluetooth adapter to use.
    /// If not provided, the default adapter is used.
    pub adapter: Option<String>,
    /// Substring the advertised name must contain. Default: "Muse".
    pub name_filter: String,
    /// How long to scan before reporting. Default: 10.5 seconds.
    pub scan_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            name_filter: "Muse".to_string(),
            scan_timeout: Duration::from_millis(10_500),
        }
    }
}

impl DeviceConfig {
    /// Updates the Bluetooth adapter name.
    ///
    /// # Arguments
    ///
    /// * `adapter` - The name of the Bluetooth adapter.
    ///
    /// # Returns
    ///
    /// * `Self` - The updated configuration.
    pub fn with_adapter(mut self, adapter: String) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Updates the advertised-name filter.
    /// If not provided, the default filter is "Muse".
    pub fn with_name_filter(mut self, name: String) -> Self {
        self.name_filter = name;
        self
    }

    /// Updates the scan window.
    pub fn with_scan_timeout(mut self, scan_timeout: Duration) -> Self {
        self.scan_timeout = scan_timeout;
        self
    }

    /// Gets the configured Bluetooth adapter and powers it on.
    ///
    /// # Errors
    ///
    /// This function will return an error if the session creation, adapter retrieval,
    /// or powering on the adapter fails.
    pub async fn get_adapter(&self) -> bluer::Result<Adapter> {
        let session = Session::new().await?;
        let adapter = if let Some(name) = &self.adapter {
            session.adapter(name)?
        } else {
            session.default_adapter().await?
        };
        adapter.set_powered(true).await?;
        Ok(adapter)
    }

    /// Returns `true` if an advertised name passes the filter.
    pub fn matches(&self, name: &str) -> bool {
        name.contains(&self.name_filter)
    }

    /// Builds a descriptor from a device's name lookup if the name passes
    /// the filter. A failed lookup (typically a device that vanished since
    /// it was announced) is logged and skipped.
    pub fn candidate(
        &self,
        address: Address,
        name: bluer::Result<Option<String>>,
    ) -> Option<DeviceDescriptor> {
        match name {
            Ok(Some(name)) if self.matches(&name) => {
                log::info!("Found {name} at {address}");
                Some(DeviceDescriptor { name, address })
            }
            Ok(_) => None,
            Err(e) => {
                log::debug!("Skipping {address}: {e}");
                None
            }
        }
    }

    /// Scans with the provided adapter for the whole scan window and
    /// collects every device whose name passes the filter.
    ///
    /// Devices announced without a name are looked up again when the window
    /// closes, since BlueZ often resolves names after the device appears.
    ///
    /// # Errors
    ///
    /// This function will return an error if starting discovery fails.
    pub async fn scan(&self, adapter: &Adapter) -> bluer::Result<Vec<DeviceDescriptor>> {
        log::info!(
            "Searching for devices matching {:?} on {} for {:.1}s",
            self.name_filter,
            adapter.name(),
            self.scan_timeout.as_secs_f64()
        );
        let device_events = adapter.discover_devices().await?;
        pin_mut!(device_events);

        let deadline = Instant::now() + self.scan_timeout;
        let mut found: Vec<DeviceDescriptor> = Vec::new();
        let mut unnamed: Vec<Address> = Vec::new();
        // Stop at the deadline or when the event stream ends
        while let Ok(Some(event)) = timeout_at(deadline, device_events.next()).await {
            let AdapterEvent::DeviceAdded(addr) = event else {
                continue;
            };
            if found.iter().any(|d| d.address == addr) || unnamed.contains(&addr) {
                continue;
            }
            let name = lookup_name(adapter, addr).await;
            if matches!(name, Ok(None)) {
                unnamed.push(addr);
            }
            found.extend(self.candidate(addr, name));
        }

        for addr in unnamed {
            let name = lookup_name(adapter, addr).await;
            found.extend(self.candidate(addr, name));
        }
        Ok(found)
    }
}

async fn lookup_name(adapter: &Adapter, addr: Address) -> bluer::Result<Option<String>> {
    adapter.device(addr)?.name().await
}

impl DeviceDiscovery for DeviceConfig {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let adapter = self.get_adapter().await?;
        Ok(self.scan(&adapter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DeviceConfig::default();
        assert_eq!(config.adapter, None);
        assert_eq!(config.name_filter, "Muse");
        assert_eq!(config.scan_timeout, Duration::from_millis(10_500));
    }

    #[test]
    fn test_builder_and_filter() {
        let config = DeviceConfig::default()
            .with_adapter("hci1".to_string())
            .with_name_filter("MuseS".to_string())
            .with_scan_timeout(Duration::from_secs(2));
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert!(config.matches("MuseS-7F21"));
        assert!(!config.matches("Muse-7F21"));
        assert!(!config.matches("MyndBand"));
        assert_eq!(config.scan_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_candidate_filters_and_skips_failed_lookups() {
        let config = DeviceConfig::default();
        let addr = Address::new([0x00, 0x55, 0xDA, 0xB0, 0x12, 0x34]);

        let found = config.candidate(addr, Ok(Some("Muse-1234".to_string())));
        assert_eq!(
            found,
            Some(DeviceDescriptor {
                name: "Muse-1234".to_string(),
                address: addr,
            })
        );
        assert_eq!(config.candidate(addr, Ok(Some("Headphones".to_string()))), None);
        assert_eq!(config.candidate(addr, Ok(None)), None);

        let vanished = bluer::Error {
            kind: bluer::ErrorKind::Failed,
            message: "device removed".to_string(),
        };
        assert_eq!(config.candidate(addr, Err(vanished)), None);
    }
}
