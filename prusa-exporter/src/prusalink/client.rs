//! PrusaLink HTTP client.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use digest_auth::{AuthContext, HttpMethod, WwwAuthenticateHeader};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::types::{Job, PrinterInfo, PrinterStatus};
use crate::printers::Printer;

/// Error type for device round trips.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status: {0}")]
    Status(StatusCode),
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Capability to query a printer's state over its HTTP API.
///
/// Every call is independent; implementations must not cache job state.
pub trait DeviceClient: Clone + Send + Sync + 'static {
    /// Fetch live telemetry (`/api/v1/status`).
    fn get_status(
        &self,
        printer: &Printer,
    ) -> impl Future<Output = Result<PrinterStatus, DeviceError>> + Send;

    /// Fetch static printer information (`/api/v1/info`).
    fn get_info(
        &self,
        printer: &Printer,
    ) -> impl Future<Output = Result<PrinterInfo, DeviceError>> + Send;

    /// Fetch the current job; an idle printer yields `Job::default()`.
    fn get_job(&self, printer: &Printer) -> impl Future<Output = Result<Job, DeviceError>> + Send;

    /// Fetch the PNG thumbnail of the file at `path`.
    fn get_job_image_png(
        &self,
        printer: &Printer,
        path: &str,
    ) -> impl Future<Output = Result<Vec<u8>, DeviceError>> + Send;

    /// Upload `gcode` as `name` to the printer's USB storage and run it.
    fn upload_gcode(
        &self,
        printer: &Printer,
        name: &str,
        gcode: &str,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;
}

/// PrusaLink client using reqwest.
///
/// Digest challenges are cached per printer serial so that steady-state
/// requests need a single round trip.
#[derive(Clone)]
pub struct PrusaLinkClient {
    client: reqwest::Client,
    challenges: Arc<Mutex<HashMap<String, WwwAuthenticateHeader>>>,
}

const USER_AGENT: &str = concat!("prusa-exporter/", env!("CARGO_PKG_VERSION"));

impl PrusaLinkClient {
    /// Create a new client.
    pub fn new() -> Result<Self, DeviceError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            client,
            challenges: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Perform an authenticated GET.
    async fn get(&self, printer: &Printer, path: &str) -> Result<reqwest::Response, DeviceError> {
        self.execute(printer, Method::GET, path, HeaderMap::new(), None)
            .await
    }

    /// Perform a request, answering one digest challenge if needed.
    async fn execute(
        &self,
        printer: &Printer,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<reqwest::Response, DeviceError> {
        let url = format!("{}{}", printer.base_url(), path);
        trace!(serial = %printer.serial, %method, %url, "PrusaLink request");

        let cached = self.authorization(printer, &method, path, None)?;
        let response = self
            .send(printer, &method, &url, &headers, body.clone(), cached)
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED || !has_credentials(printer) {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DeviceError::Auth("missing WWW-Authenticate header".to_string()))?;
        let prompt =
            digest_auth::parse(challenge).map_err(|e| DeviceError::Auth(e.to_string()))?;

        debug!(serial = %printer.serial, "Answering digest challenge");
        let authorization = self.authorization(printer, &method, path, Some(prompt))?;
        self.send(printer, &method, &url, &headers, body, authorization)
            .await
    }

    async fn send(
        &self,
        printer: &Printer,
        method: &Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<String>,
        authorization: Option<String>,
    ) -> Result<reqwest::Response, DeviceError> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(printer.timeout)
            .headers(headers.clone());

        if let Some(api_key) = &printer.api_key {
            request = request.header("X-Api-Key", api_key);
        }
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        Ok(request.send().await?)
    }

    /// Build a digest `Authorization` header from a fresh or cached challenge.
    fn authorization(
        &self,
        printer: &Printer,
        method: &Method,
        path: &str,
        fresh: Option<WwwAuthenticateHeader>,
    ) -> Result<Option<String>, DeviceError> {
        let (Some(username), Some(password)) = (&printer.username, &printer.password) else {
            return Ok(None);
        };

        let mut challenges = self.challenges.lock();
        if let Some(prompt) = fresh {
            challenges.insert(printer.serial.clone(), prompt);
        }

        let Some(prompt) = challenges.get_mut(&printer.serial) else {
            return Ok(None);
        };

        let context = AuthContext::new_with_method(
            username.as_str(),
            password.as_str(),
            path,
            None::<&[u8]>,
            HttpMethod::from(method.as_str()),
        );
        let answer = prompt
            .respond(&context)
            .map_err(|e| DeviceError::Auth(e.to_string()))?;

        Ok(Some(answer.to_header_string()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        printer: &Printer,
        path: &str,
    ) -> Result<T, DeviceError> {
        let response = check_status(self.get(printer, path).await?)?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn has_credentials(printer: &Printer) -> bool {
    printer.username.is_some() && printer.password.is_some()
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DeviceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(DeviceError::Status(status))
    }
}

impl DeviceClient for PrusaLinkClient {
    async fn get_status(&self, printer: &Printer) -> Result<PrinterStatus, DeviceError> {
        self.get_json(printer, "/api/v1/status").await
    }

    async fn get_info(&self, printer: &Printer) -> Result<PrinterInfo, DeviceError> {
        self.get_json(printer, "/api/v1/info").await
    }

    async fn get_job(&self, printer: &Printer) -> Result<Job, DeviceError> {
        let response = check_status(self.get(printer, "/api/v1/job").await?)?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Job::default());
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Job::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_job_image_png(&self, printer: &Printer, path: &str) -> Result<Vec<u8>, DeviceError> {
        let thumb_path = format!("/thumb/l/{}", path.trim_start_matches('/'));
        let response = check_status(self.get(printer, &thumb_path).await?)?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload_gcode(&self, printer: &Printer, name: &str, gcode: &str) -> Result<(), DeviceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/x.gcode"));
        headers.insert("print-after-upload", HeaderValue::from_static("?1"));
        headers.insert("overwrite", HeaderValue::from_static("?1"));

        let path = format!("/api/v1/files/usb/{}", name);
        let response = self
            .execute(printer, Method::PUT, &path, headers, Some(gcode.to_string()))
            .await?;
        check_status(response)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prusa_common::config::PrinterConfig;

    fn printer(username: Option<&str>, password: Option<&str>) -> Printer {
        Printer::from_config(&PrinterConfig {
            serial: "ABC123".to_string(),
            address: "10.0.0.5".to_string(),
            name: None,
            model: None,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            api_key: None,
            scrape_timeout_secs: Some(1),
        })
    }

    #[test]
    fn test_no_authorization_without_credentials() {
        let client = PrusaLinkClient::new().unwrap();
        let header = client
            .authorization(&printer(None, None), &Method::GET, "/api/v1/job", None)
            .unwrap();
        assert!(header.is_none());
    }

    #[test]
    fn test_no_authorization_before_challenge() {
        let client = PrusaLinkClient::new().unwrap();
        let header = client
            .authorization(
                &printer(Some("maker"), Some("secret")),
                &Method::GET,
                "/api/v1/job",
                None,
            )
            .unwrap();
        assert!(header.is_none());
    }

    #[test]
    fn test_digest_authorization_from_challenge() {
        let client = PrusaLinkClient::new().unwrap();
        let printer = printer(Some("maker"), Some("secret"));
        let prompt =
            digest_auth::parse(r#"Digest realm="Printer API", nonce="dcd98b7102dd2f0e""#).unwrap();

        let header = client
            .authorization(&printer, &Method::GET, "/api/v1/job", Some(prompt))
            .unwrap()
            .unwrap();

        assert!(header.starts_with("Digest "));
        assert!(header.contains(r#"username="maker""#));
        assert!(header.contains(r#"uri="/api/v1/job""#));

        // The challenge is cached for the next request
        let again = client
            .authorization(&printer, &Method::GET, "/api/v1/status", None)
            .unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_unreachable_printer_is_http_error() {
        let client = PrusaLinkClient::new().unwrap();
        let printer = Printer::from_config(&PrinterConfig {
            serial: "ABC123".to_string(),
            address: "127.0.0.1:1".to_string(),
            name: None,
            model: None,
            username: None,
            password: None,
            api_key: None,
            scrape_timeout_secs: Some(1),
        });

        let result = client.get_job(&printer).await;
        assert!(matches!(result, Err(DeviceError::Http(_))));

        let result = client
            .upload_gcode(&printer, "prusa_exporter_udp.gcode", "M330 SYSLOG\n")
            .await;
        assert!(matches!(result, Err(DeviceError::Http(_))));
    }

    #[test]
    fn test_digest_authorization_for_upload() {
        let client = PrusaLinkClient::new().unwrap();
        let printer = printer(Some("maker"), Some("secret"));
        let prompt = digest_auth::parse(
            r#"Digest realm="Printer API", nonce="dcd98b7102dd2f0e", qop="auth""#,
        )
        .unwrap();

        let put = client
            .authorization(&printer, &Method::PUT, "/api/v1/files/usb/a.gcode", Some(prompt))
            .unwrap()
            .unwrap();

        assert!(put.starts_with("Digest "));
        assert!(put.contains(r#"uri="/api/v1/files/usb/a.gcode""#));
    }
}
