//! Registry of configured printers.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use prusa_common::config::{ExporterConfig, PrinterConfig};

/// Default scrape timeout for printers built without one.
const DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 10;

/// An effective, immutable printer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Printer {
    /// Serial number, unique within the registry.
    pub serial: String,
    /// Address as configured (host, host:port or URL).
    pub address: String,
    /// Display name.
    pub name: String,
    /// Printer model.
    pub model: String,
    /// Digest credentials.
    pub username: Option<String>,
    pub password: Option<String>,
    /// PrusaLink API key.
    pub api_key: Option<String>,
    /// Timeout applied to each device round trip.
    pub timeout: Duration,
}

impl Printer {
    /// Build an effective printer from its configuration entry.
    pub fn from_config(config: &PrinterConfig) -> Self {
        Self {
            serial: config.serial.clone(),
            address: config.address.clone(),
            name: config.display_name().to_string(),
            model: config.model_name().to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_secs(
                config
                    .scrape_timeout_secs
                    .unwrap_or(DEFAULT_SCRAPE_TIMEOUT_SECS),
            ),
        }
    }

    /// Base URL of the PrusaLink API, without trailing slash.
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    /// The host part of the address, as used to match datagram senders.
    pub fn host(&self) -> &str {
        let address = self.address.trim();
        let address = address
            .strip_prefix("http://")
            .or_else(|| address.strip_prefix("https://"))
            .unwrap_or(address);
        let host = address.split('/').next().unwrap_or(address);

        // Bracketed IPv6 literal, optionally with a port
        if let Some(rest) = host.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }

        match host.rsplit_once(':') {
            // A single colon separates host and port; more means a bare IPv6
            Some((h, _)) if !h.contains(':') => h,
            _ => host,
        }
    }

    /// Labels identifying this printer on every pulled sample.
    pub fn labels(&self) -> [(&'static str, String); 4] {
        [
            ("printer_address", self.address.clone()),
            ("printer_model", self.model.clone()),
            ("printer_name", self.name.clone()),
            ("printer_serial", self.serial.clone()),
        ]
    }
}

/// Static, read-only set of configured printers.
#[derive(Debug, Default)]
pub struct PrinterRegistry {
    printers: Vec<Printer>,
    by_serial: HashMap<String, usize>,
}

impl PrinterRegistry {
    /// Build the registry from a loaded configuration.
    ///
    /// Serials are expected to be unique (enforced by config validation);
    /// if they are not, the first entry wins.
    pub fn from_config(config: &ExporterConfig) -> Self {
        Self::from_printers(config.printers.iter().map(Printer::from_config).collect())
    }

    /// Build the registry from effective printers.
    pub fn from_printers(printers: Vec<Printer>) -> Self {
        let mut by_serial = HashMap::with_capacity(printers.len());
        for (index, printer) in printers.iter().enumerate() {
            by_serial.entry(printer.serial.clone()).or_insert(index);
        }
        Self {
            printers,
            by_serial,
        }
    }

    /// Find a printer by its serial number.
    pub fn find_by_serial(&self, serial: &str) -> Option<&Printer> {
        self.by_serial.get(serial).map(|&index| &self.printers[index])
    }

    /// Find the printer whose address host equals `ip`.
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<&Printer> {
        self.printers
            .iter()
            .find(|p| p.host().parse::<IpAddr>().is_ok_and(|host| host == ip))
    }

    /// Iterate over printers in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Printer> {
        self.printers.iter()
    }

    pub fn len(&self) -> usize {
        self.printers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.printers.is_empty()
    }
}

/// Create a shareable printer registry handle.
pub type SharedPrinters = Arc<PrinterRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn printer(serial: &str, address: &str) -> Printer {
        Printer::from_config(&PrinterConfig {
            serial: serial.to_string(),
            address: address.to_string(),
            name: None,
            model: None,
            username: None,
            password: None,
            api_key: None,
            scrape_timeout_secs: None,
        })
    }

    #[test]
    fn test_find_by_serial_distinct() {
        let registry = PrinterRegistry::from_printers(vec![
            printer("ABC123", "10.0.0.5"),
            printer("XYZ789", "10.0.0.6"),
        ]);

        let a = registry.find_by_serial("ABC123").unwrap();
        let b = registry.find_by_serial("XYZ789").unwrap();

        assert_eq!(a.address, "10.0.0.5");
        assert_eq!(b.address, "10.0.0.6");
        assert_ne!(a, b);
        assert!(registry.find_by_serial("UNKNOWN").is_none());
        assert!(registry.find_by_serial("abc123").is_none());
    }

    #[test]
    fn test_duplicate_serial_first_wins() {
        let registry = PrinterRegistry::from_printers(vec![
            printer("ABC123", "10.0.0.5"),
            printer("ABC123", "10.0.0.6"),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find_by_serial("ABC123").unwrap().address, "10.0.0.5");
    }

    #[test]
    fn test_defaults_from_config() {
        let p = printer("ABC123", "10.0.0.5");
        assert_eq!(p.name, "ABC123");
        assert_eq!(p.model, "unknown");
        assert_eq!(p.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_base_url() {
        assert_eq!(printer("A", "10.0.0.5").base_url(), "http://10.0.0.5");
        assert_eq!(printer("A", "10.0.0.5:8080/").base_url(), "http://10.0.0.5:8080");
        assert_eq!(
            printer("A", "https://mk4.local").base_url(),
            "https://mk4.local"
        );
    }

    #[test]
    fn test_host() {
        assert_eq!(printer("A", "10.0.0.5").host(), "10.0.0.5");
        assert_eq!(printer("A", "10.0.0.5:8080").host(), "10.0.0.5");
        assert_eq!(printer("A", "http://mk4.local:80/").host(), "mk4.local");
        assert_eq!(printer("A", "[fe80::1]:80").host(), "fe80::1");
        assert_eq!(printer("A", "fe80::1").host(), "fe80::1");
    }

    #[test]
    fn test_find_by_ip() {
        let registry = PrinterRegistry::from_printers(vec![
            printer("ABC123", "http://10.0.0.5:80"),
            printer("HOST", "mk4.local"),
        ]);

        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(registry.find_by_ip(ip).unwrap().serial, "ABC123");
        assert!(registry.find_by_ip("10.0.0.9".parse().unwrap()).is_none());
    }
}
