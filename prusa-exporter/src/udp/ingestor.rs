//! Datagram listener feeding the UDP metrics registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use prusa_common::metric::MetricSample;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::parser::{self, Datagram, DecodeError};
use crate::mapping::datagram_metric_name;
use crate::printers::SharedPrinters;
use crate::registry::SharedRegistry;

/// Decodes datagrams and writes the resulting samples into a registry.
///
/// Cheap to clone; clones share the registry and counters.
#[derive(Clone)]
pub struct DatagramSink {
    prefix: String,
    registry: SharedRegistry,
    printers: SharedPrinters,
    received: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl DatagramSink {
    /// Create a sink writing `{prefix}`-named samples into `registry`.
    pub fn new(prefix: impl Into<String>, registry: SharedRegistry, printers: SharedPrinters) -> Self {
        let sink = Self {
            prefix: prefix.into(),
            registry,
            printers,
            received: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        sink.publish_counters();
        sink
    }

    /// Decode one datagram from `source` and record its samples.
    ///
    /// Returns the number of samples recorded. A malformed datagram is
    /// rejected as a whole and counted as dropped.
    pub fn ingest(&self, data: &[u8], source: SocketAddr) -> Result<usize, DecodeError> {
        self.received.fetch_add(1, Ordering::Relaxed);

        let text = String::from_utf8_lossy(data);
        let result = parser::parse(&text).map(|datagram| {
            let samples = self.to_samples(&datagram, source);
            self.registry.record_all(&samples)
        });

        if result.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.publish_counters();
        result
    }

    /// Convert a decoded datagram into samples.
    fn to_samples(&self, datagram: &Datagram, source: SocketAddr) -> Vec<MetricSample> {
        let ip = source.ip();
        let printer = self.printers.find_by_ip(ip);

        let mut samples = Vec::new();
        for line in &datagram.lines {
            for (field, value) in &line.fields {
                let Some(value) = value.as_f64() else {
                    tracing::trace!(
                        measurement = %line.measurement,
                        field = %field,
                        "Skipping non-numeric field"
                    );
                    continue;
                };

                let mut sample = MetricSample::gauge(
                    datagram_metric_name(&self.prefix, &line.measurement, field),
                    value,
                )
                .with_labels(line.tags.iter().cloned())
                .with_label("ip", ip.to_string());

                if let Some(mac) = &datagram.hostname {
                    sample = sample.with_label("mac", mac.clone());
                }
                if let Some(printer) = printer {
                    sample = sample
                        .with_label("printer_name", printer.name.clone())
                        .with_label("printer_serial", printer.serial.clone());
                }

                samples.push(sample);
            }
        }
        samples
    }

    fn publish_counters(&self) {
        self.registry.record(&MetricSample::counter(
            format!("{}exporter_datagrams_received_total", self.prefix),
            self.received.load(Ordering::Relaxed) as f64,
        ));
        self.registry.record(&MetricSample::counter(
            format!("{}exporter_datagrams_dropped_total", self.prefix),
            self.dropped.load(Ordering::Relaxed) as f64,
        ));
        self.registry.record(&MetricSample::gauge(
            format!("{}exporter_series_total", self.prefix),
            self.registry.series_count() as f64,
        ));
    }

    /// Number of datagrams received.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Number of datagrams dropped as malformed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// UDP listener bound at startup, running for the process lifetime.
pub struct DatagramIngestor {
    socket: UdpSocket,
    sink: DatagramSink,
    max_message_size: usize,
}

impl DatagramIngestor {
    /// Bind the datagram socket.
    pub async fn bind(bind: &str, sink: DatagramSink, max_message_size: usize) -> Result<Self> {
        let socket = UdpSocket::bind(bind)
            .await
            .with_context(|| format!("Failed to bind UDP socket to {}", bind))?;

        Ok(Self {
            socket,
            sink,
            max_message_size,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to read UDP socket address")
    }

    /// Run the receive loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Receive datagrams forever. Neither receive errors nor malformed
    /// datagrams end the loop.
    async fn run(self) {
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!("UDP metrics listener started on {}", addr);
        }

        let mut buf = vec![0u8; self.max_message_size];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, addr)) => match self.sink.ingest(&buf[..len], addr) {
                    Ok(count) => {
                        tracing::trace!("Recorded {} samples from {}", count, addr);
                    }
                    Err(e) => {
                        tracing::debug!("Dropping datagram from {}: {}", addr, e);
                    }
                },
                Err(e) => {
                    tracing::error!("UDP receive error: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printers::{Printer, PrinterRegistry};
    use crate::registry::MetricRegistry;
    use prusa_common::config::PrinterConfig;

    fn sink() -> (DatagramSink, SharedRegistry) {
        let registry = Arc::new(MetricRegistry::new(1000));
        let printers = Arc::new(PrinterRegistry::from_printers(vec![Printer::from_config(
            &PrinterConfig {
                serial: "ABC123".to_string(),
                address: "10.0.0.5".to_string(),
                name: Some("mk4".to_string()),
                model: None,
                username: None,
                password: None,
                api_key: None,
                scrape_timeout_secs: None,
            },
        )]));
        (DatagramSink::new("prusa_", registry.clone(), printers), registry)
    }

    #[test]
    fn test_ingest_records_samples() {
        let (sink, registry) = sink();
        let source: SocketAddr = "10.0.0.5:5000".parse().unwrap();

        let count = sink
            .ingest(
                b"<134>1 - 10:9c:70:27:4b:3b buddy - - - msg=1,tm=2,v=4 temp_noz v=214.8 0\nfan,fan=print rpm=5400i 0",
                source,
            )
            .unwrap();

        assert_eq!(count, 2);
        let output = registry.render();
        assert!(output.contains(
            "prusa_temp_noz{ip=\"10.0.0.5\",mac=\"10:9c:70:27:4b:3b\",printer_name=\"mk4\",printer_serial=\"ABC123\"} 214.8"
        ));
        assert!(output.contains("prusa_fan_rpm{fan=\"print\",ip=\"10.0.0.5\""));
        assert!(output.contains("prusa_exporter_datagrams_received_total 1"));
    }

    #[test]
    fn test_ingest_unknown_sender_has_no_printer_labels() {
        let (sink, registry) = sink();
        let source: SocketAddr = "10.0.0.99:5000".parse().unwrap();

        sink.ingest(b"<134>1 - mac buddy - - - temp_bed v=60", source)
            .unwrap();

        let output = registry.render();
        assert!(output.contains("prusa_temp_bed{ip=\"10.0.0.99\",mac=\"mac\"} 60"));
    }

    #[test]
    fn test_ingest_skips_text_fields() {
        let (sink, _) = sink();
        let source: SocketAddr = "10.0.0.5:5000".parse().unwrap();

        let count = sink
            .ingest(b"<134>1 - mac buddy - - - err text=\"oops\",code=3i", source)
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_malformed_datagram_counted_as_dropped() {
        let (sink, registry) = sink();
        let source: SocketAddr = "10.0.0.5:5000".parse().unwrap();

        assert!(sink.ingest(b"\xff\xfe garbage", source).is_err());
        assert!(sink.ingest(b"<134>1 - mac buddy - - - temp_bed v=60", source).is_ok());

        assert_eq!(sink.received(), 2);
        assert_eq!(sink.dropped(), 1);
        let output = registry.render();
        assert!(output.contains("prusa_exporter_datagrams_dropped_total 1"));
        assert!(output.contains("prusa_temp_bed"));
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let (sink, _) = sink();
        let ingestor = DatagramIngestor::bind("127.0.0.1:0", sink, 1024).await.unwrap();
        let addr = ingestor.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let (sink, _) = sink();
        let result = DatagramIngestor::bind("not-an-address", sink, 1024).await;
        assert!(result.is_err());
    }
}
