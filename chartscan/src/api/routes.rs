use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use opentelemetry::metrics::{Counter, Histogram, Meter, Unit};
use tracing::{error, info, instrument, warn};

use super::models::ScanRequest;
use crate::error::{AppError, Result};
use crate::models::ImageInfo;
use crate::scanner::ChartScanner;

// Service metrics exported on /metrics
pub struct AppMetrics {
    pub scan_requests: Counter<u64>,
    pub scan_failures: Counter<u64>,
    pub images_discovered: Histogram<f64>,
    pub inspection_failures: Counter<u64>,
}

impl AppMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            scan_requests: meter
                .u64_counter("scan_requests_total")
                .with_description("Total number of scan requests")
                .with_unit(Unit::new("requests"))
                .init(),
            scan_failures: meter
                .u64_counter("scan_failures_total")
                .with_description("Scans aborted by a fatal error")
                .with_unit(Unit::new("requests"))
                .init(),
            images_discovered: meter
                .f64_histogram("images_discovered")
                .with_description("Unique image references found per chart")
                .with_unit(Unit::new("images"))
                .init(),
            inspection_failures: meter
                .u64_counter("image_inspection_failures_total")
                .with_description("Images whose registry inspection failed or timed out")
                .with_unit(Unit::new("images"))
                .init(),
        }
    }
}

// Type alias for our application state
pub type AppState = (Arc<ChartScanner>, Arc<AppMetrics>);

// Create the router for the scan API
pub fn scan_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/scan", post(scan_chart))
        .route("/healthz", get(health_check))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Scan a chart archive and report the size of every image it references
#[instrument(name = "scan_chart", skip_all)]
async fn scan_chart(
    State((scanner, metrics)): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<ImageInfo>>> {
    // Increment request counter
    metrics.scan_requests.add(1, &[]);

    // Decoded whatever the Content-Type says
    let request: ScanRequest = serde_json::from_slice(&body).map_err(|e| {
        warn!("Rejected scan request: {}", e);
        AppError::BadRequest("invalid JSON body".to_string())
    })?;

    let chart_url = request.chart_url.trim();
    if chart_url.is_empty() {
        return Err(AppError::BadRequest("chart_url is required".to_string()));
    }

    info!("Scanning chart: {}", chart_url);
    let report = match scanner.scan(chart_url).await {
        Ok(report) => report,
        Err(e) => {
            metrics.scan_failures.add(1, &[]);
            error!("Scan of {} failed: {}", chart_url, e);
            return Err(e.into());
        }
    };

    metrics.images_discovered.record(report.discovered as f64, &[]);
    metrics
        .inspection_failures
        .add(report.inspection_failures() as u64, &[]);

    info!(
        "Scan of {} finished: {} of {} images inspected, {} documents skipped",
        chart_url,
        report.images.len(),
        report.discovered,
        report.documents_skipped
    );

    let mut images = report.images;
    images.sort_by(|a, b| a.image.cmp(&b.image));
    Ok(Json(images))
}
