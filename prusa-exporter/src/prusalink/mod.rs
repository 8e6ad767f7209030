//! PrusaLink device API.

mod client;
pub mod types;
pub mod udp_metrics;

pub use client::{DeviceClient, DeviceError, PrusaLinkClient};
pub use types::{Job, JobFile, JobStatus, PrinterInfo, PrinterState, PrinterStatus};
pub use udp_metrics::{enable_udp_metrics, udp_metrics_gcode};
