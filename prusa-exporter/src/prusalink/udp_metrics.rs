//! Points printers at the exporter's syslog listener.
//!
//! The printer firmware is configured with G-code: `M330` selects the syslog
//! handler, `M334` sets the destination and `M331` enables one metric.

use std::fmt::Write;

use tokio::task::JoinSet;
use tracing::{info, warn};

use super::client::{DeviceClient, DeviceError};
use crate::printers::PrinterRegistry;

/// Name of the uploaded G-code file on the printer's USB storage.
pub const UDP_METRICS_GCODE_FILE: &str = "prusa_exporter_udp.gcode";

/// Metrics the printers are asked to push.
const DEFAULT_UDP_METRICS: &[&str] = &[
    "temp_noz",
    "ttemp_noz",
    "temp_bed",
    "ttemp_bed",
    "temp_brd",
    "temp_mcu",
    "temp_hbr",
    "print_fan_act",
    "heatbreak_fan_act",
    "pos_z",
    "fil_sensor",
    "loadcell_value",
];

/// Build the G-code that enables UDP metrics towards `target` (`host:port`).
///
/// Returns `None` when `target` has no host or no valid, non-zero port.
pub fn udp_metrics_gcode(target: &str) -> Option<String> {
    let (host, port) = target.trim().rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() || port == 0 {
        return None;
    }

    let mut gcode = String::from("M330 SYSLOG\n");
    let _ = writeln!(gcode, "M334 {} {}", host, port);
    for metric in DEFAULT_UDP_METRICS {
        let _ = writeln!(gcode, "M331 {}", metric);
    }
    Some(gcode)
}

/// Ask every printer to push its metrics to `target`.
///
/// Best effort: each printer is tried once under its own timeout and
/// failures are only logged. Returns the number of printers that accepted
/// the configuration.
pub async fn enable_udp_metrics<C: DeviceClient>(
    client: &C,
    printers: &PrinterRegistry,
    target: &str,
) -> usize {
    let Some(gcode) = udp_metrics_gcode(target) else {
        warn!(destination = target, "Invalid UDP metrics target, expected host:port");
        return 0;
    };

    let mut tasks = JoinSet::new();
    for printer in printers.iter() {
        let client = client.clone();
        let printer = printer.clone();
        let gcode = gcode.clone();
        tasks.spawn(async move {
            let result = tokio::time::timeout(
                printer.timeout,
                client.upload_gcode(&printer, UDP_METRICS_GCODE_FILE, &gcode),
            )
            .await
            .unwrap_or_else(|_| Err(DeviceError::Timeout(printer.timeout)));
            (printer, result)
        });
    }

    let mut enabled = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((printer, Ok(()))) => {
                enabled += 1;
                info!(serial = %printer.serial, destination = target, "UDP metrics enabled");
            }
            Ok((printer, Err(e))) => {
                warn!(
                    serial = %printer.serial,
                    address = %printer.address,
                    error = %e,
                    "Failed to enable UDP metrics"
                );
            }
            Err(e) => warn!("UDP metrics task failed: {}", e),
        }
    }
    enabled
}
