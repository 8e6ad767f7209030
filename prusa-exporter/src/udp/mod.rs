//! Syslog UDP metrics ingestion.

mod ingestor;
pub mod parser;

pub use ingestor::{DatagramIngestor, DatagramSink};
pub use parser::{Datagram, DecodeError, FieldValue, MetricLine, MetricsHeader};
