//! Prometheus exporter for Prusa printers.
//!
//! Two independent metric sources are exposed over HTTP:
//!
//! - PrusaLink, scraped on demand whenever the PrusaLink endpoint is hit.
//! - Syslog UDP datagrams pushed by the printers, decoded into a registry
//!   that the UDP endpoint renders.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────────┐
//! │ PrusaLink API   │<────│  PullCollector  │<────│                     │
//! │ (per printer)   │     │  (per scrape)   │     │    HTTP Server      │
//! └─────────────────┘     └─────────────────┘     │ /metrics/prusalink  │
//! ┌─────────────────┐     ┌─────────────────┐     │ /metrics/udp        │
//! │ Syslog UDP      │────>│ DatagramIngestor│────>│ /{serial}/jobimage  │
//! │ (:8514)         │     │ (MetricRegistry)│     │                     │
//! └─────────────────┘     └─────────────────┘     └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! prusa-exporter --config.file prusa.json5
//! ```
//!
//! See [`prusa_common::config::ExporterConfig`] for the printers file format.

pub mod app;
pub mod args;
pub mod collector;
pub mod http;
pub mod mapping;
pub mod mock;
pub mod printers;
pub mod prusalink;
pub mod registry;
pub mod udp;

pub use app::{Exporter, StartupError};
pub use args::Args;
pub use collector::{PullCollector, SharedPullCollector};
pub use http::{AppState, HttpServer, create_router};
pub use printers::{Printer, PrinterRegistry, SharedPrinters};
pub use prusalink::{DeviceClient, DeviceError, PrusaLinkClient};
pub use registry::{MetricRegistry, SharedRegistry};
pub use udp::{DatagramIngestor, DatagramSink};
