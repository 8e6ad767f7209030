//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use prusa_common::LogFormat;

/// Prometheus exporter for Prusa printers.
#[derive(Parser, Debug, Clone)]
#[command(name = "prusa-exporter")]
#[command(about = "Export PrusaLink and syslog UDP metrics from Prusa printers")]
#[command(version)]
pub struct Args {
    /// Path to the printers file (JSON5 format).
    #[arg(long = "config.file", default_value = "./prusa.json5")]
    pub config_file: PathBuf,

    /// Path of the PrusaLink metrics endpoint.
    #[arg(long = "exporter.metrics-path", default_value = "/metrics/prusalink")]
    pub metrics_path: String,

    /// Path of the UDP metrics endpoint.
    #[arg(long = "exporter.udp-metrics-path", default_value = "/metrics/udp")]
    pub udp_metrics_path: String,

    /// HTTP port, bound on all interfaces.
    #[arg(long = "exporter.metrics-port", default_value_t = 10009)]
    pub metrics_port: u16,

    /// Replace every printer address with this one.
    #[arg(long = "exporter.ip-override", default_value = "")]
    pub ip_override: String,

    /// Default per-printer scrape timeout in seconds.
    #[arg(long = "prusalink.scrape-timeout", default_value_t = 10)]
    pub scrape_timeout: u64,

    /// Ask every printer at startup to push UDP metrics to this `host:port`.
    /// Changes printer settings; empty leaves the printers untouched.
    #[arg(long = "prusalink.udp-metrics-target", default_value = "")]
    pub udp_metrics_target: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log.level", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long = "log.format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Address the syslog UDP listener binds to.
    #[arg(long = "listen-address", default_value = "0.0.0.0:8514")]
    pub listen_address: String,

    /// Prefix of metrics derived from UDP datagrams.
    #[arg(long = "prefix", default_value = "prusa_")]
    pub prefix: String,
}
