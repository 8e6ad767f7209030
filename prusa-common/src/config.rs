use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// Complete exporter configuration as loaded from the printers file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Printers to scrape and serve job images for.
    pub printers: Vec<PrinterConfig>,

    /// Datagram listener settings.
    #[serde(default)]
    pub udp: UdpConfig,
}

/// A single configured printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// Printer serial number, unique across the configuration.
    pub serial: String,

    /// Host, `host:port` or full base URL of the PrusaLink API.
    pub address: String,

    /// Display name (defaults to the serial).
    #[serde(default)]
    pub name: Option<String>,

    /// Printer model, e.g. "MK4" or "XL".
    #[serde(default)]
    pub model: Option<String>,

    /// Username for HTTP Digest authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for HTTP Digest authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// PrusaLink API key, sent as `X-Api-Key`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-printer scrape timeout; the global timeout applies when unset.
    #[serde(default)]
    pub scrape_timeout_secs: Option<u64>,
}

impl PrinterConfig {
    /// Display name, falling back to the serial.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.serial)
    }

    /// Model name, falling back to "unknown".
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("unknown")
    }
}

/// Datagram (syslog metrics) listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpConfig {
    /// Receive buffer size; longer datagrams are truncated.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum unique time series kept for datagram metrics.
    #[serde(default = "default_max_series")]
    pub max_series: usize,
}

fn default_max_message_size() -> usize {
    65535
}

fn default_max_series() -> usize {
    100_000
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_series: default_max_series(),
        }
    }
}

impl ExporterConfig {
    /// Parse configuration from a JSON5 string and validate it.
    pub fn parse(content: &str) -> Result<Self> {
        let config: ExporterConfig = json5::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let mut serials = HashSet::with_capacity(self.printers.len());

        for printer in &self.printers {
            if printer.serial.trim().is_empty() {
                return Err(Error::Validation(
                    "printer serial must not be empty".to_string(),
                ));
            }

            if printer.address.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "printer {} has an empty address",
                    printer.serial
                )));
            }

            if printer.scrape_timeout_secs == Some(0) {
                return Err(Error::Validation(format!(
                    "printer {} has scrape_timeout_secs = 0",
                    printer.serial
                )));
            }

            if !serials.insert(printer.serial.as_str()) {
                return Err(Error::Validation(format!(
                    "duplicate printer serial: {}",
                    printer.serial
                )));
            }
        }

        if self.udp.max_message_size == 0 {
            return Err(Error::Validation(
                "udp.max_message_size must be > 0".to_string(),
            ));
        }

        if self.udp.max_series == 0 {
            return Err(Error::Validation(
                "udp.max_series must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply the global scrape timeout and the address override to every printer.
    ///
    /// Printers keep their own `scrape_timeout_secs` when set. An empty
    /// override leaves addresses untouched.
    pub fn apply_overrides(&mut self, scrape_timeout_secs: u64, address_override: &str) {
        let address_override = address_override.trim();

        for printer in &mut self.printers {
            printer.scrape_timeout_secs.get_or_insert(scrape_timeout_secs);
            if !address_override.is_empty() {
                printer.address = address_override.to_string();
            }
        }
    }
}

/// Load and validate the printers file, then apply CLI overrides.
pub fn load_config(
    path: impl AsRef<Path>,
    scrape_timeout_secs: u64,
    address_override: &str,
) -> Result<ExporterConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let mut config: ExporterConfig = json5::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    config.validate()?;
    config.apply_overrides(scrape_timeout_secs, address_override);
    Ok(config)
}
