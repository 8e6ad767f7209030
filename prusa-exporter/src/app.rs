//! Startup sequence and process lifetime.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use prusa_common::load_config;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::args::Args;
use crate::collector::PullCollector;
use crate::http::{AppState, HttpServer, RouterConfig, create_router};
use crate::printers::PrinterRegistry;
use crate::prusalink::{DeviceError, PrusaLinkClient, enable_udp_metrics};
use crate::registry::MetricRegistry;
use crate::udp::{DatagramIngestor, DatagramSink};

/// Errors that stop the exporter.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("metrics path and UDP metrics path must differ, both are '{0}'")]
    DuplicateMetricsPath(String),

    #[error("invalid endpoint path '{0}': must start with '/' and be literal")]
    InvalidPath(String),

    #[error("config file not found: {}", .0.display())]
    MissingConfig(PathBuf),

    #[error(transparent)]
    Config(#[from] prusa_common::Error),

    #[error("failed to create PrusaLink client: {0}")]
    Client(#[from] DeviceError),

    #[error("failed to start UDP listener: {0:#}")]
    Udp(anyhow::Error),

    #[error("failed to bind HTTP server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(std::io::Error),

    #[error("UDP listener stopped unexpectedly")]
    IngestorStopped,
}

/// Characters the router treats as capture syntax.
const ROUTE_PATTERN_CHARS: [char; 4] = [':', '*', '{', '}'];

/// Check both endpoint paths before anything else is touched.
///
/// Paths are matched literally, so capture syntax is rejected.
pub fn validate_paths(metrics_path: &str, udp_metrics_path: &str) -> Result<(), StartupError> {
    for path in [metrics_path, udp_metrics_path] {
        if !path.starts_with('/') || path.contains(ROUTE_PATTERN_CHARS) {
            return Err(StartupError::InvalidPath(path.to_string()));
        }
    }
    if metrics_path == udp_metrics_path {
        return Err(StartupError::DuplicateMetricsPath(metrics_path.to_string()));
    }
    Ok(())
}

/// A fully wired exporter, ready to serve.
pub struct Exporter {
    router: Router,
    listen_addr: SocketAddr,
    udp_addr: SocketAddr,
    ingestor: JoinHandle<()>,
}

impl Exporter {
    /// Validate the arguments, load the printers file and start the UDP listener.
    pub async fn build(args: &Args) -> Result<Self, StartupError> {
        validate_paths(&args.metrics_path, &args.udp_metrics_path)?;

        if !args.config_file.exists() {
            return Err(StartupError::MissingConfig(args.config_file.clone()));
        }

        let config = load_config(&args.config_file, args.scrape_timeout, &args.ip_override)?;
        info!(
            path = %args.config_file.display(),
            printers = config.printers.len(),
            "Loaded printers file"
        );

        let printers = Arc::new(PrinterRegistry::from_config(&config));
        let client = PrusaLinkClient::new()?;
        let collector = Arc::new(PullCollector::new(printers.clone(), client.clone()));

        let udp_target = args.udp_metrics_target.trim();
        if !udp_target.is_empty() {
            let enabled = enable_udp_metrics(&client, &printers, udp_target).await;
            info!(
                enabled,
                printers = printers.len(),
                "UDP metrics enablement finished"
            );
        }

        let udp_registry = Arc::new(MetricRegistry::new(config.udp.max_series));
        let sink = DatagramSink::new(&args.prefix, udp_registry.clone(), printers.clone());
        let ingestor = DatagramIngestor::bind(&args.listen_address, sink, config.udp.max_message_size)
            .await
            .map_err(StartupError::Udp)?;
        let udp_addr = ingestor.local_addr().map_err(StartupError::Udp)?;
        let ingestor = ingestor.spawn();

        let router = create_router(AppState {
            collector,
            printers,
            client,
            udp_registry,
            config: Arc::new(RouterConfig {
                metrics_path: args.metrics_path.clone(),
                udp_metrics_path: args.udp_metrics_path.clone(),
                udp_listen_address: args.listen_address.clone(),
            }),
        });

        Ok(Self {
            router,
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.metrics_port)),
            udp_addr,
            ingestor,
        })
    }

    /// The HTTP router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Address the UDP listener is bound to.
    pub fn udp_addr(&self) -> SocketAddr {
        self.udp_addr
    }

    /// Bind the HTTP listener and serve forever.
    pub async fn run(self) -> Result<(), StartupError> {
        let server = HttpServer::bind(self.router, self.listen_addr)
            .await
            .map_err(|source| StartupError::Bind {
                addr: self.listen_addr,
                source,
            })?;

        info!(
            http = %self.listen_addr,
            udp = %self.udp_addr,
            "Prusa exporter started"
        );

        tokio::select! {
            result = server.run() => result.map_err(StartupError::Serve),
            joined = self.ingestor => {
                if let Err(e) = joined {
                    error!("UDP listener task failed: {}", e);
                }
                Err(StartupError::IngestorStopped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["prusa-exporter", "--listen-address", "127.0.0.1:0"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_validate_paths() {
        assert!(validate_paths("/metrics/prusalink", "/metrics/udp").is_ok());
        assert!(matches!(
            validate_paths("/metrics", "/metrics"),
            Err(StartupError::DuplicateMetricsPath(_))
        ));
        assert!(matches!(
            validate_paths("metrics", "/metrics/udp"),
            Err(StartupError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_paths("/metrics", ""),
            Err(StartupError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_validate_paths_rejects_capture_syntax() {
        for path in ["/m/:a", "/metrics/*rest", "/metrics/{id}", "/metrics}"] {
            assert!(
                matches!(
                    validate_paths(path, "/metrics/udp"),
                    Err(StartupError::InvalidPath(_))
                ),
                "path {}",
                path
            );
            assert!(
                matches!(
                    validate_paths("/metrics/prusalink", path),
                    Err(StartupError::InvalidPath(_))
                ),
                "path {}",
                path
            );
        }
        assert!(matches!(
            validate_paths("/m/:a", "/m/:b"),
            Err(StartupError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_syntax_rejected_before_config() {
        let args = args(&[
            "--config.file",
            "/nonexistent/prusa.json5",
            "--exporter.metrics-path",
            "/metrics/:x",
        ]);

        let result = Exporter::build(&args).await;
        assert!(matches!(result, Err(StartupError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn test_duplicate_paths_checked_before_config() {
        let args = args(&[
            "--config.file",
            "/nonexistent/prusa.json5",
            "--exporter.metrics-path",
            "/metrics",
            "--exporter.udp-metrics-path",
            "/metrics",
        ]);

        let result = Exporter::build(&args).await;
        assert!(matches!(result, Err(StartupError::DuplicateMetricsPath(_))));
    }

    #[tokio::test]
    async fn test_missing_config() {
        let args = args(&["--config.file", "/nonexistent/prusa.json5"]);

        let result = Exporter::build(&args).await;
        assert!(matches!(result, Err(StartupError::MissingConfig(_))));
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ printers: [{{ serial: '' }}] }}").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let result = Exporter::build(&args(&["--config.file", &path])).await;
        assert!(matches!(result, Err(StartupError::Config(_))));
    }

    #[tokio::test]
    async fn test_udp_bind_failure() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ printers: [] }}").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let argv = [
            "prusa-exporter",
            "--config.file",
            &path,
            "--listen-address",
            "not-an-address",
        ];
        let result = Exporter::build(&Args::parse_from(argv)).await;
        assert!(matches!(result, Err(StartupError::Udp(_))));
    }

    #[tokio::test]
    async fn test_build_binds_udp() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{{ printers: [{{ serial: 'ABC123', address: '10.0.0.5' }}] }}"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let exporter = Exporter::build(&args(&["--config.file", &path])).await.unwrap();
        assert_ne!(exporter.udp_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_udp_metrics_enablement_failure_is_not_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{{ printers: [{{ serial: 'ABC123', address: '127.0.0.1:1', scrape_timeout_secs: 1 }}] }}"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let exporter = Exporter::build(&args(&[
            "--config.file",
            &path,
            "--prusalink.udp-metrics-target",
            "127.0.0.1:8514",
        ]))
        .await;
        assert!(exporter.is_ok());
    }

    #[tokio::test]
    async fn test_http_bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port().to_string();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ printers: [] }}").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let exporter = Exporter::build(&args(&[
            "--config.file",
            &path,
            "--exporter.metrics-port",
            &port,
        ]))
        .await
        .unwrap();

        let result = exporter.run().await;
        assert!(matches!(result, Err(StartupError::Bind { .. })));
        drop(taken);
    }
}
