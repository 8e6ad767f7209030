//! Mock device client for testing.
//!
//! Serves canned PrusaLink responses per printer serial without any
//! network access, and records every call it receives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;

use crate::printers::Printer;
use crate::prusalink::{
    DeviceClient, DeviceError, Job, JobFile, JobStatus, PrinterInfo, PrinterState, PrinterStatus,
};

/// Canned responses for one printer. `None` makes the call fail.
#[derive(Debug, Clone, Default)]
pub struct MockPrinter {
    pub status: Option<PrinterStatus>,
    pub info: Option<PrinterInfo>,
    pub job: Option<Job>,
    pub image: Option<Vec<u8>>,
    /// Whether G-code uploads succeed.
    pub accepts_gcode: bool,
    /// Delay applied before every response.
    pub delay: Option<Duration>,
}

impl MockPrinter {
    /// A reachable, idle printer.
    pub fn online() -> Self {
        Self {
            status: Some(PrinterStatus {
                printer: PrinterState {
                    state: "IDLE".to_string(),
                    temp_nozzle: Some(24.5),
                    target_nozzle: Some(0.0),
                    temp_bed: Some(23.0),
                    target_bed: Some(0.0),
                    axis_x: Some(241.0),
                    axis_y: Some(170.0),
                    axis_z: Some(4.0),
                    flow: Some(100.0),
                    speed: Some(100.0),
                    fan_hotend: Some(0.0),
                    fan_print: Some(0.0),
                },
                job: None,
            }),
            info: Some(PrinterInfo {
                nozzle_diameter: Some(0.4),
                mmu: false,
                serial: String::new(),
                hostname: "prusa-mk4".to_string(),
                min_extrusion_temp: Some(170.0),
            }),
            job: Some(Job::default()),
            image: None,
            accepts_gcode: true,
            delay: None,
        }
    }

    /// A printer whose every call fails.
    pub fn offline() -> Self {
        Self::default()
    }

    /// Make the printer report an active job printing `path`.
    pub fn with_job(mut self, path: &str, progress: f64) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        self.job = Some(Job {
            id: Some(1),
            state: "PRINTING".to_string(),
            progress: Some(progress),
            time_remaining: Some(600.0),
            time_printing: Some(1200.0),
            file: JobFile {
                display_name: name.clone(),
                name,
                path: path.to_string(),
            },
        });
        if let Some(status) = &mut self.status {
            status.printer.state = "PRINTING".to_string();
            status.job = Some(JobStatus {
                id: Some(1),
                progress: Some(progress),
                time_remaining: Some(600.0),
                time_printing: Some(1200.0),
            });
        }
        self
    }

    /// Serve `bytes` as the job thumbnail.
    pub fn with_image(mut self, bytes: Vec<u8>) -> Self {
        self.image = Some(bytes);
        self
    }

    /// Make the job endpoint fail while the rest keeps working.
    pub fn with_failing_job(mut self) -> Self {
        self.job = None;
        self
    }

    /// Delay every response.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub serial: String,
    pub endpoint: &'static str,
}

/// A G-code file uploaded to the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUpload {
    pub serial: String,
    pub name: String,
    pub gcode: String,
}

#[derive(Default)]
struct MockState {
    printers: HashMap<String, MockPrinter>,
    calls: Vec<MockCall>,
    uploads: Vec<MockUpload>,
}

/// Device client returning canned responses.
#[derive(Clone, Default)]
pub struct MockDeviceClient {
    state: Arc<Mutex<MockState>>,
}

impl MockDeviceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register canned responses for `serial`.
    pub fn with_printer(self, serial: &str, printer: MockPrinter) -> Self {
        self.state
            .lock()
            .printers
            .insert(serial.to_string(), printer);
        self
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// All G-code uploads received so far, accepted or not.
    pub fn uploads(&self) -> Vec<MockUpload> {
        self.state.lock().uploads.clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    async fn respond<T>(
        &self,
        printer: &Printer,
        endpoint: &'static str,
        pick: impl FnOnce(&MockPrinter) -> Option<T>,
    ) -> Result<T, DeviceError> {
        let (value, delay) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall {
                serial: printer.serial.clone(),
                endpoint,
            });
            match state.printers.get(&printer.serial) {
                Some(mock) => (pick(mock), mock.delay),
                None => (None, None),
            }
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        value.ok_or(DeviceError::Status(StatusCode::SERVICE_UNAVAILABLE))
    }
}

impl DeviceClient for MockDeviceClient {
    async fn get_status(&self, printer: &Printer) -> Result<PrinterStatus, DeviceError> {
        self.respond(printer, "status", |m| m.status.clone()).await
    }

    async fn get_info(&self, printer: &Printer) -> Result<PrinterInfo, DeviceError> {
        self.respond(printer, "info", |m| m.info.clone()).await
    }

    async fn get_job(&self, printer: &Printer) -> Result<Job, DeviceError> {
        self.respond(printer, "job", |m| m.job.clone()).await
    }

    async fn get_job_image_png(&self, printer: &Printer, _path: &str) -> Result<Vec<u8>, DeviceError> {
        self.respond(printer, "thumbnail", |m| m.image.clone()).await
    }

    async fn upload_gcode(&self, printer: &Printer, name: &str, gcode: &str) -> Result<(), DeviceError> {
        self.state.lock().uploads.push(MockUpload {
            serial: printer.serial.clone(),
            name: name.to_string(),
            gcode: gcode.to_string(),
        });
        self.respond(printer, "gcode", |m| m.accepts_gcode.then_some(()))
            .await
    }
}
