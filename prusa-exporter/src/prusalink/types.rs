//! PrusaLink v1 API response types.

use serde::Deserialize;

/// Response of `GET /api/v1/status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrinterStatus {
    pub printer: PrinterState,
    #[serde(default)]
    pub job: Option<JobStatus>,
}

/// Telemetry block of the status response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrinterState {
    #[serde(default)]
    pub state: String,
    pub temp_nozzle: Option<f64>,
    pub target_nozzle: Option<f64>,
    pub temp_bed: Option<f64>,
    pub target_bed: Option<f64>,
    pub axis_x: Option<f64>,
    pub axis_y: Option<f64>,
    pub axis_z: Option<f64>,
    /// Flow factor in percent.
    pub flow: Option<f64>,
    /// Speed factor in percent.
    pub speed: Option<f64>,
    pub fan_hotend: Option<f64>,
    pub fan_print: Option<f64>,
}

/// Job summary embedded in the status response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStatus {
    pub id: Option<u64>,
    /// Progress in percent.
    pub progress: Option<f64>,
    pub time_remaining: Option<f64>,
    pub time_printing: Option<f64>,
}

/// Response of `GET /api/v1/info`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrinterInfo {
    pub nozzle_diameter: Option<f64>,
    #[serde(default)]
    pub mmu: bool,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub hostname: String,
    pub min_extrusion_temp: Option<f64>,
}

/// Response of `GET /api/v1/job`.
///
/// The device answers `204 No Content` when idle; that maps to
/// `Job::default()`, whose file path is empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Job {
    pub id: Option<u64>,
    #[serde(default)]
    pub state: String,
    /// Progress in percent.
    pub progress: Option<f64>,
    pub time_remaining: Option<f64>,
    pub time_printing: Option<f64>,
    #[serde(default)]
    pub file: JobFile,
}

/// File being printed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Storage directory (e.g. `/usb`) or the full file path.
    #[serde(default)]
    pub path: String,
}

impl Job {
    /// Full path of the active job file, empty when there is no job.
    pub fn file_path(&self) -> String {
        let path = self.file.path.trim_end_matches('/');
        let name = self.file.name.as_str();

        if path.is_empty() {
            return if name.is_empty() {
                String::new()
            } else {
                format!("/{}", name.trim_start_matches('/'))
            };
        }

        if name.is_empty() || path.ends_with(&format!("/{}", name)) {
            path.to_string()
        } else {
            format!("{}/{}", path, name)
        }
    }

    /// Whether a print job with a file is active.
    pub fn is_active(&self) -> bool {
        !self.file_path().is_empty()
    }

    /// Human readable job name.
    pub fn display_name(&self) -> &str {
        if self.file.display_name.is_empty() {
            &self.file.name
        } else {
            &self.file.display_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let json = r#"{
            "storage": {"path": "/usb/", "name": "usb", "read_only": false},
            "printer": {
                "state": "PRINTING",
                "temp_bed": 60.1, "target_bed": 60.0,
                "temp_nozzle": 214.8, "target_nozzle": 215.0,
                "axis_z": 1.2, "axis_x": 120.0, "axis_y": 80.5,
                "flow": 100, "speed": 120,
                "fan_hotend": 3200, "fan_print": 5400
            },
            "job": {"id": 297, "progress": 41.0, "time_remaining": 1800, "time_printing": 1200}
        }"#;

        let status: PrinterStatus = serde_json::from_str(json).unwrap();

        assert_eq!(status.printer.state, "PRINTING");
        assert_eq!(status.printer.temp_nozzle, Some(214.8));
        assert_eq!(status.printer.speed, Some(120.0));
        assert_eq!(status.job.unwrap().progress, Some(41.0));
    }

    #[test]
    fn test_parse_status_idle() {
        let json = r#"{"printer": {"state": "IDLE", "temp_bed": 23.6}}"#;
        let status: PrinterStatus = serde_json::from_str(json).unwrap();

        assert_eq!(status.printer.state, "IDLE");
        assert!(status.printer.axis_x.is_none());
        assert!(status.job.is_none());
    }

    #[test]
    fn test_parse_job() {
        let json = r#"{
            "id": 297, "state": "PRINTING", "progress": 91.0,
            "time_remaining": 240, "time_printing": 5400,
            "file": {
                "refs": {"thumbnail": "/thumb/l/usb/BENCHY~1.BGC"},
                "name": "BENCHY~1.BGC", "display_name": "benchy.bgcode",
                "path": "/usb", "size": 123456, "m_timestamp": 1700000000
            }
        }"#;

        let job: Job = serde_json::from_str(json).unwrap();

        assert_eq!(job.file_path(), "/usb/BENCHY~1.BGC");
        assert_eq!(job.display_name(), "benchy.bgcode");
        assert!(job.is_active());
    }

    #[test]
    fn test_job_file_path_variants() {
        let mut job = Job::default();
        assert_eq!(job.file_path(), "");
        assert!(!job.is_active());

        job.file.path = "/usb/print.gcode".to_string();
        assert_eq!(job.file_path(), "/usb/print.gcode");

        job.file.name = "print.gcode".to_string();
        assert_eq!(job.file_path(), "/usb/print.gcode");

        job.file.path = String::new();
        assert_eq!(job.file_path(), "/print.gcode");
    }
}
