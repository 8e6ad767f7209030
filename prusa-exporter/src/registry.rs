//! Metric registry that stores samples and renders the Prometheus text format.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use parking_lot::RwLock;
use prusa_common::metric::{MetricKind, MetricSample};
use tracing::warn;

use crate::mapping::{sanitize_label_name, sanitize_metric_name};

/// Content type of the Prometheus text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// A unique identifier for a metric time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    /// The full Prometheus metric name.
    pub name: String,
    /// Sorted label key-value pairs.
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Create a series key from a sample, sanitizing names.
    pub fn from_sample(sample: &MetricSample) -> Self {
        let mut labels: Vec<(String, String)> = sample
            .labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .collect();

        // Sanitizing can reorder keys
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        labels.dedup_by(|a, b| a.0 == b.0);

        Self {
            name: sanitize_metric_name(&sample.name),
            labels,
        }
    }

    /// Format labels for Prometheus exposition format.
    pub fn format_labels(&self) -> String {
        format_labels(&self.labels)
    }
}

/// A stored metric value.
#[derive(Debug, Clone)]
pub struct StoredMetric {
    /// The series identifier.
    pub key: SeriesKey,
    /// The metric type.
    pub kind: MetricKind,
    /// The current value.
    pub value: f64,
    /// Timestamp supplied by the source, if any.
    pub timestamp_ms: Option<i64>,
}

impl StoredMetric {
    /// Create a stored metric from a sample.
    pub fn from_sample(sample: &MetricSample) -> Self {
        Self {
            key: SeriesKey::from_sample(sample),
            kind: sample.kind,
            value: sample.value,
            timestamp_ms: sample.timestamp_ms,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Samples written into the registry.
    pub samples_accepted: u64,
    /// New series rejected because `max_series` was reached.
    pub samples_dropped_max_series: u64,
}

/// Thread-safe metric registry.
///
/// Each series keeps its last written value. Series are never expired.
pub struct MetricRegistry {
    metrics: RwLock<HashMap<SeriesKey, StoredMetric>>,
    max_series: usize,
    stats: RwLock<RegistryStats>,
}

impl MetricRegistry {
    /// Create a new registry holding at most `max_series` series.
    pub fn new(max_series: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            max_series,
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// Record a sample, replacing the previous value of its series.
    ///
    /// Returns `false` when the sample opened a new series past the limit.
    pub fn record(&self, sample: &MetricSample) -> bool {
        let stored = StoredMetric::from_sample(sample);
        let key = stored.key.clone();

        let mut metrics = self.metrics.write();

        if !metrics.contains_key(&key) && metrics.len() >= self.max_series {
            drop(metrics);
            self.stats.write().samples_dropped_max_series += 1;
            warn!(
                max_series = self.max_series,
                metric = %key.name,
                "Max series limit reached, dropping new metric"
            );
            return false;
        }

        metrics.insert(key, stored);
        drop(metrics);

        self.stats.write().samples_accepted += 1;
        true
    }

    /// Record every sample in `samples`, returning how many were stored.
    pub fn record_all(&self, samples: &[MetricSample]) -> usize {
        samples.iter().filter(|s| self.record(s)).count()
    }

    /// Get the current number of stored series.
    pub fn series_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let metrics = self.metrics.read();
        render_metrics(metrics.values())
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

/// Render a one-shot batch of samples without storing them.
///
/// Later samples for an identical series replace earlier ones.
pub fn encode_samples(samples: &[MetricSample]) -> String {
    let mut by_key: HashMap<SeriesKey, StoredMetric> = HashMap::with_capacity(samples.len());
    for sample in samples {
        let stored = StoredMetric::from_sample(sample);
        by_key.insert(stored.key.clone(), stored);
    }
    render_metrics(by_key.values())
}

/// Group metrics by family and write them in sorted order.
fn render_metrics<'a>(metrics: impl Iterator<Item = &'a StoredMetric>) -> String {
    let mut by_name: HashMap<&str, Vec<&StoredMetric>> = HashMap::new();
    for metric in metrics {
        by_name.entry(&metric.key.name).or_default().push(metric);
    }

    let mut names: Vec<_> = by_name.keys().copied().collect();
    names.sort_unstable();

    let mut output = String::with_capacity(names.len() * 128);

    for name in names {
        let mut series = by_name.remove(name).unwrap_or_default();
        if series.is_empty() {
            continue;
        }
        series.sort_by(|a, b| a.key.labels.cmp(&b.key.labels));

        // The first series decides the family type
        let _ = writeln!(output, "# TYPE {} {}", name, series[0].kind);

        for metric in series {
            let _ = write!(
                output,
                "{}{} {}",
                name,
                metric.key.format_labels(),
                format_value(metric.value)
            );
            if let Some(ts) = metric.timestamp_ms {
                let _ = write!(output, " {}", ts);
            }
            output.push('\n');
        }
    }

    output
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_from_sample() {
        let sample = MetricSample::gauge("prusa_temp-noz", 210.0)
            .with_label("printer-name", "mk4")
            .with_label("ip", "10.0.0.5");

        let key = SeriesKey::from_sample(&sample);

        assert_eq!(key.name, "prusa_temp_noz");
        assert_eq!(
            key.labels,
            vec![
                ("ip".to_string(), "10.0.0.5".to_string()),
                ("printer_name".to_string(), "mk4".to_string()),
            ]
        );
    }

    #[test]
    fn test_series_key_format_labels() {
        let key = SeriesKey {
            name: "test_metric".to_string(),
            labels: vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ],
        };

        assert_eq!(key.format_labels(), "{a=\"1\",b=\"2\"}");
    }

    #[test]
    fn test_registry_last_write_wins() {
        let registry = MetricRegistry::new(10);
        registry.record(&MetricSample::gauge("prusa_temp_bed", 59.0).with_label("mac", "aa"));
        registry.record(&MetricSample::gauge("prusa_temp_bed", 60.5).with_label("mac", "aa"));

        assert_eq!(registry.series_count(), 1);
        let output = registry.render();
        assert!(output.contains("prusa_temp_bed{mac=\"aa\"} 60.5"));
        assert!(!output.contains("59"));
    }

    #[test]
    fn test_registry_render_sorted_families() {
        let registry = MetricRegistry::new(10);
        registry.record(&MetricSample::gauge("zeta", 1.0));
        registry.record(&MetricSample::counter("alpha", 2.0));

        let output = registry.render();
        let alpha = output.find("# TYPE alpha counter").unwrap();
        let zeta = output.find("# TYPE zeta gauge").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn test_registry_max_series_limit() {
        let registry = MetricRegistry::new(2);

        assert!(registry.record(&MetricSample::gauge("a", 1.0)));
        assert!(registry.record(&MetricSample::gauge("b", 1.0)));
        assert!(!registry.record(&MetricSample::gauge("c", 1.0)));
        // Updating an existing series is still allowed
        assert!(registry.record(&MetricSample::gauge("a", 2.0)));

        assert_eq!(registry.series_count(), 2);
        let stats = registry.stats();
        assert_eq!(stats.samples_accepted, 3);
        assert_eq!(stats.samples_dropped_max_series, 1);
    }

    #[test]
    fn test_render_timestamp() {
        let output = encode_samples(&[MetricSample::gauge("x", 1.0).with_timestamp(1700000000000)]);
        assert!(output.contains("x 1 1700000000000\n"));
    }

    #[test]
    fn test_encode_samples_groups_series() {
        let samples = vec![
            MetricSample::gauge("prusa_up", 1.0).with_label("printer_serial", "A"),
            MetricSample::gauge("prusa_up", 0.0).with_label("printer_serial", "B"),
        ];

        let output = encode_samples(&samples);

        assert_eq!(output.matches("# TYPE prusa_up gauge").count(), 1);
        assert!(output.contains("prusa_up{printer_serial=\"A\"} 1\n"));
        assert!(output.contains("prusa_up{printer_serial=\"B\"} 0\n"));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(3.25), "3.25");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
