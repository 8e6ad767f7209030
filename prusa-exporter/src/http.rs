//! HTTP server: metrics endpoints, job thumbnails and the status page.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info};

use crate::collector::SharedPullCollector;
use crate::printers::SharedPrinters;
use crate::prusalink::DeviceClient;
use crate::registry::{SharedRegistry, TEXT_CONTENT_TYPE};

/// File name of the job image route, `/{serial}/jobimage.png`.
pub const JOB_IMAGE_FILE: &str = "jobimage.png";

/// Client-side cache lifetime of served job images.
const JOB_IMAGE_CACHE_CONTROL: &str = "public, max-age=30";

/// Result of matching a request path against the job image route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatch<'a> {
    /// `/{serial}/jobimage.png` with a non-empty, percent-decoded serial.
    JobImage { serial: Cow<'a, str> },
    /// Ends in `/jobimage.png` but is not exactly two segments.
    Malformed,
    /// Not a job image request.
    Other,
}

/// Match `path` against the job image route.
pub fn match_job_image(path: &str) -> RouteMatch<'_> {
    let is_image = path
        .strip_suffix(JOB_IMAGE_FILE)
        .is_some_and(|rest| rest.ends_with('/'));
    if path.len() <= 1 || !is_image {
        return RouteMatch::Other;
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let segments: Vec<&str> = trimmed.split('/').collect();

    match segments.as_slice() {
        [serial, file] if !serial.is_empty() && *file == JOB_IMAGE_FILE => {
            match percent_decode_str(*serial).decode_utf8() {
                Ok(serial) => RouteMatch::JobImage { serial },
                Err(_) => RouteMatch::Malformed,
            }
        }
        _ => RouteMatch::Malformed,
    }
}

/// Paths and addresses shown on the status page.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Path of the PrusaLink metrics endpoint.
    pub metrics_path: String,
    /// Path of the UDP metrics endpoint.
    pub udp_metrics_path: String,
    /// Address the datagram listener is bound to.
    pub udp_listen_address: String,
}

/// Application state shared across handlers.
pub struct AppState<C> {
    pub collector: SharedPullCollector<C>,
    pub printers: SharedPrinters,
    pub client: C,
    pub udp_registry: SharedRegistry,
    pub config: Arc<RouterConfig>,
}

impl<C: Clone> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            collector: self.collector.clone(),
            printers: self.printers.clone(),
            client: self.client.clone(),
            udp_registry: self.udp_registry.clone(),
            config: self.config.clone(),
        }
    }
}

/// Create the HTTP router.
pub fn create_router<C: DeviceClient>(state: AppState<C>) -> Router {
    let metrics_path = state.config.metrics_path.clone();
    let udp_metrics_path = state.config.udp_metrics_path.clone();

    Router::new()
        .route(&metrics_path, get(prusalink_metrics_handler::<C>))
        .route(&udp_metrics_path, get(udp_metrics_handler::<C>))
        .fallback(fallback_handler::<C>)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the PrusaLink metrics endpoint; scrapes every printer.
async fn prusalink_metrics_handler<C: DeviceClient>(State(state): State<AppState<C>>) -> Response {
    let body = state.collector.render().await;
    metrics_response(body)
}

/// Handler for the UDP metrics endpoint.
async fn udp_metrics_handler<C: DeviceClient>(State(state): State<AppState<C>>) -> Response {
    metrics_response(state.udp_registry.render())
}

fn metrics_response(body: String) -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, TEXT_CONTENT_TYPE)], body).into_response()
}

/// Everything that is not a metrics endpoint.
async fn fallback_handler<C: DeviceClient>(
    State(state): State<AppState<C>>,
    uri: Uri,
) -> Response {
    match match_job_image(uri.path()) {
        RouteMatch::JobImage { serial } => job_image_handler(&state, &serial).await,
        RouteMatch::Malformed => StatusCode::NOT_FOUND.into_response(),
        RouteMatch::Other => Html(status_page(&state.config)).into_response(),
    }
}

/// Serve the thumbnail of the printer's active job.
async fn job_image_handler<C: DeviceClient>(state: &AppState<C>, serial: &str) -> Response {
    let Some(printer) = state.printers.find_by_serial(serial) else {
        error!(serial, "Printer with serial not found");
        return StatusCode::NOT_FOUND.into_response();
    };

    let job = match state.client.get_job(printer).await {
        Ok(job) => job,
        Err(e) => {
            error!(serial, address = %printer.address, error = %e, "Failed to get job");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to get job information",
            )
                .into_response();
        }
    };

    let path = job.file_path();
    if path.is_empty() {
        debug!(serial, "No active job or job file");
        return StatusCode::NOT_FOUND.into_response();
    }

    let image = match state.client.get_job_image_png(printer, &path).await {
        Ok(image) => image,
        Err(e) => {
            error!(serial, %path, error = %e, "Failed to get job image");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job image").into_response();
        }
    };

    (
        StatusCode::OK,
        [
            (CONTENT_TYPE, "image/png".to_string()),
            (CONTENT_LENGTH, image.len().to_string()),
            (CACHE_CONTROL, JOB_IMAGE_CACHE_CONTROL.to_string()),
        ],
        image,
    )
        .into_response()
}

fn status_page(config: &RouterConfig) -> String {
    format!(
        r#"<html>
<head><title>prusa_exporter {version}</title></head>
<body>
<h1>prusa_exporter</h1>
<p>Syslog server running at - <b>{udp}</b></p>
<p><a href="{metrics}">PrusaLink metrics</a></p>
<p><a href="{udp_metrics}">UDP Metrics</a></p>
<h2>Job Images</h2>
<p>Access job images via: <code>/{{printer-serial}}/{file}</code></p>
<p>Example: <code>/12345-4235324534563453/{file}</code></p>
</body>
</html>
"#,
        version = env!("CARGO_PKG_VERSION"),
        udp = config.udp_listen_address,
        metrics = config.metrics_path,
        udp_metrics = config.udp_metrics_path,
        file = JOB_IMAGE_FILE,
    )
}

/// HTTP server bound to its listen address.
pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    /// Bind the listener for `router`.
    pub async fn bind(router: Router, listen_addr: SocketAddr) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self { router, listener })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the process exits.
    pub async fn run(self) -> std::io::Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "HTTP server listening");
        }
        axum::serve(self.listener, self.router).await
    }
}
