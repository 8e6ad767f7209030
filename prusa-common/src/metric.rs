use std::collections::BTreeMap;

/// A single measurement destined for a Prometheus scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Metric family name (already prefixed).
    pub name: String,

    /// Label pairs, kept sorted by key.
    pub labels: BTreeMap<String, String>,

    /// The measured value.
    pub value: f64,

    /// Exposition type of the family.
    pub kind: MetricKind,

    /// Unix epoch milliseconds, when the source provides a wall-clock time.
    pub timestamp_ms: Option<i64>,
}

impl MetricSample {
    /// Create a gauge sample without labels.
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            value,
            kind: MetricKind::Gauge,
            timestamp_ms: None,
        }
    }

    /// Create a counter sample without labels.
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: MetricKind::Counter,
            ..Self::gauge(name, value)
        }
    }

    /// Add a label to this sample.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add multiple labels to this sample.
    pub fn with_labels<I, K, V>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.labels
            .extend(labels.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Attach a timestamp in Unix epoch milliseconds.
    pub fn with_timestamp(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

/// Prometheus metric type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
