//! On-demand collector for PrusaLink metrics.
//!
//! Each scrape queries every configured printer concurrently and turns the
//! responses into samples. Nothing is cached between scrapes.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use prusa_common::metric::MetricSample;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::printers::{Printer, SharedPrinters};
use crate::prusalink::{DeviceClient, DeviceError, Job, PrinterInfo, PrinterStatus};
use crate::registry::encode_samples;

/// Prefix of every pulled metric.
const PREFIX: &str = "prusa_";

/// Collector statistics, kept for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Completed scrapes.
    pub scrapes: u64,
    /// Per-printer collections that failed.
    pub printer_errors: u64,
}

/// Everything fetched from one printer during a scrape.
struct PrinterSnapshot {
    status: PrinterStatus,
    info: PrinterInfo,
    job: Job,
}

/// Pull-model collector backing the PrusaLink metrics endpoint.
pub struct PullCollector<C> {
    printers: SharedPrinters,
    client: C,
    stats: RwLock<CollectorStats>,
}

impl<C: DeviceClient> PullCollector<C> {
    /// Create a collector over the given printers.
    pub fn new(printers: SharedPrinters, client: C) -> Self {
        Self {
            printers,
            client,
            stats: RwLock::new(CollectorStats::default()),
        }
    }

    /// Query every printer and return the resulting samples.
    ///
    /// A failing printer contributes `prusa_up 0` and nothing else; it never
    /// aborts the collection of the others.
    pub async fn collect(&self) -> Vec<MetricSample> {
        let mut tasks = JoinSet::new();

        for (index, printer) in self.printers.iter().enumerate() {
            let printer = printer.clone();
            let client = self.client.clone();
            tasks.spawn(async move {
                let started = Instant::now();
                let result = scrape_printer(&client, &printer).await;
                (index, printer, result, started.elapsed())
            });
        }

        let mut results = Vec::with_capacity(self.printers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Printer scrape task failed: {}", e),
            }
        }
        results.sort_by_key(|(index, ..)| *index);

        let mut samples = Vec::new();
        let mut errors = 0;

        for (_, printer, result, elapsed) in results {
            let labels = printer.labels();
            samples.push(
                MetricSample::gauge(format!("{PREFIX}scrape_duration_seconds"), elapsed.as_secs_f64())
                    .with_labels(labels.clone()),
            );

            match result {
                Ok(snapshot) => {
                    debug!(serial = %printer.serial, ?elapsed, "Printer scraped");
                    samples.extend(snapshot_samples(&printer, &snapshot));
                }
                Err(e) => {
                    errors += 1;
                    warn!(
                        serial = %printer.serial,
                        address = %printer.address,
                        error = %e,
                        "Failed to scrape printer"
                    );
                    samples.push(
                        MetricSample::gauge(format!("{PREFIX}up"), 0.0).with_labels(labels),
                    );
                }
            }
        }

        let stats = {
            let mut stats = self.stats.write();
            stats.scrapes += 1;
            stats.printer_errors += errors;
            stats.clone()
        };

        samples.push(MetricSample::counter(
            format!("{PREFIX}exporter_scrapes_total"),
            stats.scrapes as f64,
        ));
        samples.push(MetricSample::counter(
            format!("{PREFIX}exporter_scrape_errors_total"),
            stats.printer_errors as f64,
        ));

        samples
    }

    /// Collect and render in Prometheus text format.
    pub async fn render(&self) -> String {
        encode_samples(&self.collect().await)
    }

    /// Get collector statistics.
    pub fn stats(&self) -> CollectorStats {
        self.stats.read().clone()
    }
}

/// Create a shareable collector handle.
pub type SharedPullCollector<C> = Arc<PullCollector<C>>;

/// Fetch status, info and job from one printer under its timeout.
async fn scrape_printer<C: DeviceClient>(
    client: &C,
    printer: &Printer,
) -> Result<PrinterSnapshot, DeviceError> {
    let fetch = async {
        let status = client.get_status(printer).await?;
        let info = client.get_info(printer).await?;
        let job = client.get_job(printer).await?;
        Ok::<_, DeviceError>(PrinterSnapshot { status, info, job })
    };

    tokio::time::timeout(printer.timeout, fetch)
        .await
        .map_err(|_| DeviceError::Timeout(printer.timeout))?
}

/// Convert a successful snapshot into samples.
fn snapshot_samples(printer: &Printer, snapshot: &PrinterSnapshot) -> Vec<MetricSample> {
    let labels = printer.labels();
    let gauge = |name: &str, value: f64| {
        MetricSample::gauge(format!("{PREFIX}{name}"), value).with_labels(labels.clone())
    };

    let state = &snapshot.status.printer;
    let mut samples = vec![
        gauge("up", 1.0),
        gauge("info", 1.0)
            .with_label("hostname", snapshot.info.hostname.clone())
            .with_label("device_serial", snapshot.info.serial.clone())
            .with_label("mmu", snapshot.info.mmu.to_string()),
        gauge("status_info", 1.0).with_label("printer_state", state.state.clone()),
    ];

    let optional = [
        ("nozzle_temperature_celsius", state.temp_nozzle),
        ("nozzle_target_temperature_celsius", state.target_nozzle),
        ("bed_temperature_celsius", state.temp_bed),
        ("bed_target_temperature_celsius", state.target_bed),
        ("print_speed_ratio", state.speed.map(|v| v / 100.0)),
        ("print_flow_ratio", state.flow.map(|v| v / 100.0)),
        ("nozzle_diameter_millimeters", snapshot.info.nozzle_diameter),
        ("min_extrusion_temperature_celsius", snapshot.info.min_extrusion_temp),
    ];
    samples.extend(
        optional
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| gauge(name, v))),
    );

    for (axis, value) in [("x", state.axis_x), ("y", state.axis_y), ("z", state.axis_z)] {
        if let Some(value) = value {
            samples.push(gauge("axis_position_millimeters", value).with_label("axis", axis));
        }
    }

    for (fan, value) in [("hotend", state.fan_hotend), ("print", state.fan_print)] {
        if let Some(value) = value {
            samples.push(gauge("fan_speed_rpm", value).with_label("fan", fan));
        }
    }

    let job = &snapshot.job;
    if job.is_active() {
        samples.push(
            gauge("job_info", 1.0)
                .with_label("printer_job_name", job.display_name().to_string())
                .with_label("printer_job_path", job.file_path()),
        );

        // The status endpoint may be more current than the job endpoint
        let status_job = snapshot.status.job.as_ref();
        let progress = status_job.and_then(|j| j.progress).or(job.progress);
        let printing = status_job.and_then(|j| j.time_printing).or(job.time_printing);
        let remaining = status_job
            .and_then(|j| j.time_remaining)
            .or(job.time_remaining);

        if let Some(progress) = progress {
            samples.push(gauge("printing_progress_ratio", progress / 100.0));
        }
        if let Some(printing) = printing {
            samples.push(gauge("printing_time_seconds", printing));
        }
        if let Some(remaining) = remaining {
            samples.push(gauge("printing_time_remaining_seconds", remaining));
        }
    }

    samples
}
