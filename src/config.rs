//! Registry configuration.
//!
//! [`ManagerConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! vendor_id = 0x0483
//! product_id = 0x5740
//! data_timeout_ms = 12000
//! refresh_interval_ms = 5000
//! ```
//!
//! Missing keys take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::Timeouts;
use crate::error::{Error, Result};
use crate::scheduler::MIN_INTERVAL;
use crate::transport::UsbSignature;
use crate::transport::serial::DEFAULT_BAUD_RATE;

/// USB vendor id reported by pods.
pub const DEFAULT_VENDOR_ID: u16 = 0x0483;

/// USB product id reported by pods.
pub const DEFAULT_PRODUCT_ID: u16 = 0x5740;

/// Device registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// USB vendor id of pod hardware.
    pub vendor_id: u16,
    /// USB product id of pod hardware.
    pub product_id: u16,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Simple exchange timeout in milliseconds.
    pub simple_timeout_ms: u64,
    /// Data exchange timeout in milliseconds.
    pub data_timeout_ms: u64,
    /// Long exchange timeout in milliseconds.
    pub long_timeout_ms: u64,
    /// Discovery cadence in milliseconds.
    pub refresh_interval_ms: u64,
    /// Number of on/off cycles when locating a pod.
    pub locate_blinks: u32,
    /// Duration of each on and each off phase when locating, in milliseconds.
    pub locate_period_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            baud_rate: DEFAULT_BAUD_RATE,
            simple_timeout_ms: 5_000,
            data_timeout_ms: 10_000,
            long_timeout_ms: 15_000,
            refresh_interval_ms: 3_000,
            locate_blinks: 3,
            locate_period_ms: 1_000,
        }
    }
}

impl ManagerConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!("loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Checks that every timeout is non-zero and the refresh interval is
    /// schedulable.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("simple_timeout_ms", self.simple_timeout_ms),
            ("data_timeout_ms", self.data_timeout_ms),
            ("long_timeout_ms", self.long_timeout_ms),
        ] {
            if value == 0 {
                return Err(Error::configuration(format!("{name} must be non-zero")));
            }
        }
        if self.refresh_interval() < MIN_INTERVAL {
            return Err(Error::configuration(format!(
                "refresh_interval_ms must be at least {} ms",
                MIN_INTERVAL.as_millis()
            )));
        }
        if self.baud_rate == 0 {
            return Err(Error::configuration("baud_rate must be non-zero"));
        }
        Ok(())
    }

    /// Sets the USB signature.
    #[must_use]
    pub const fn signature_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets all three exchange timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.simple_timeout_ms = millis(timeouts.simple);
        self.data_timeout_ms = millis(timeouts.data);
        self.long_timeout_ms = millis(timeouts.long);
        self
    }

    /// Sets the discovery cadence.
    #[must_use]
    pub fn refresh_every(mut self, interval: Duration) -> Self {
        self.refresh_interval_ms = millis(interval);
        self
    }

    /// Sets the locate blink pattern.
    #[must_use]
    pub fn locate(mut self, blinks: u32, period: Duration) -> Self {
        self.locate_blinks = blinks;
        self.locate_period_ms = millis(period);
        self
    }

    /// USB signature used to filter enumerated ports.
    #[must_use]
    pub const fn signature(&self) -> UsbSignature {
        UsbSignature {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }

    /// Exchange timeouts for protocol clients.
    #[must_use]
    pub const fn exchange_timeouts(&self) -> Timeouts {
        Timeouts {
            simple: Duration::from_millis(self.simple_timeout_ms),
            data: Duration::from_millis(self.data_timeout_ms),
            long: Duration::from_millis(self.long_timeout_ms),
        }
    }

    /// Discovery cadence.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Length of each locate on/off phase.
    #[must_use]
    pub const fn locate_period(&self) -> Duration {
        Duration::from_millis(self.locate_period_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.exchange_timeouts(), Timeouts::default());
        assert_eq!(config.refresh_interval(), Duration::from_secs(3));
        assert_eq!(
            config.signature(),
            UsbSignature {
                vendor_id: 0x0483,
                product_id: 0x5740
            }
        );
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.locate_blinks, 3);
        assert_eq!(config.locate_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ManagerConfig::from_toml_str(
            r"
            vendor_id = 0x1234
            data_timeout_ms = 12000
            refresh_interval_ms = 500
            ",
        )
        .unwrap();
        assert_eq!(config.vendor_id, 0x1234);
        assert_eq!(config.product_id, DEFAULT_PRODUCT_ID);
        assert_eq!(config.exchange_timeouts().data, Duration::from_secs(12));
        assert_eq!(config.refresh_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = ManagerConfig::from_toml_str("refresh_every = 3").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_short_interval_and_zero_timeout() {
        let config = ManagerConfig::default().refresh_every(Duration::from_millis(5));
        assert!(matches!(config.validate(), Err(Error::Configuration { .. })));

        let err = ManagerConfig::from_toml_str("long_timeout_ms = 0").unwrap_err();
        assert!(err.to_string().contains("long_timeout_ms"));
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::default()
            .signature_ids(0x1a86, 0x7523)
            .baud_rate(9600)
            .timeouts(Timeouts {
                simple: Duration::from_millis(100),
                data: Duration::from_millis(200),
                long: Duration::from_millis(300),
            })
            .locate(5, Duration::from_millis(250));
        assert_eq!(config.signature().vendor_id, 0x1a86);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.long_timeout_ms, 300);
        assert_eq!(config.locate_blinks, 5);
        assert_eq!(config.locate_period_ms, 250);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ManagerConfig::load("/nonexistent/podlink.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
