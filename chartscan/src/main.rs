use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::get,
    response::IntoResponse,
};
use opentelemetry::{global, KeyValue};
use opentelemetry::metrics::MeterProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, Sampler},
    Resource,
};
use prometheus::{Encoder, TextEncoder};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, instrument};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use chartscan::api::routes::{self, AppMetrics};
use chartscan::config::AppConfig;
use chartscan::scanner::ChartScanner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize OpenTelemetry tracing
    let tracer = init_tracer()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(tracer) = tracer {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .with(OpenTelemetryLayer::new(tracer))
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    // Load configuration
    let config = AppConfig::load()?;
    info!("Loaded configuration: port={}, scan={:?}", config.port, config.scan);

    let scanner = Arc::new(ChartScanner::from_config(&config)?);

    // Initialize OpenTelemetry metrics with Prometheus
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone())
        .build()?;
    let meter_provider = opentelemetry_sdk::metrics::MeterProvider::builder()
        .with_resource(Resource::new(vec![
            KeyValue::new("service.name", "chartscan"),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ]))
        .with_reader(exporter)
        .build();
    let meter = meter_provider.meter("chartscan");
    let app_metrics = Arc::new(AppMetrics::new(&meter));

    // Create application state
    let app_state = (Arc::clone(&scanner), Arc::clone(&app_metrics));

    // Create a clone of the registry for the metrics endpoint
    let metrics_registry = registry.clone();

    // Build application with metrics endpoint
    let app = Router::new()
        .route("/metrics", get(move || metrics_handler(metrics_registry.clone())))
        .merge(routes::scan_router(app_state))
        .with_state((scanner, app_metrics))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting chartscand server on {}", addr);
    info!("Metrics available at http://{}:{}/metrics", addr.ip(), addr.port());

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shut down OpenTelemetry tracer provider
    global::shutdown_tracer_provider();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

// Initialize OpenTelemetry tracer when an OTLP endpoint is configured
fn init_tracer() -> anyhow::Result<Option<trace::Tracer>> {
    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();

    if let Some(otlp_endpoint) = otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(otlp_endpoint)
            )
            .with_trace_config(
                trace::config()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(Resource::new(vec![
                        KeyValue::new("service.name", "chartscan"),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ]))
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        Ok(Some(tracer))
    } else {
        Ok(None)
    }
}

// Metrics endpoint handler for Prometheus scraping
#[instrument(name = "metrics_handler", skip_all)]
async fn metrics_handler(registry: prometheus::Registry) -> impl IntoResponse {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    // Encode metrics to the buffer
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    // Convert the buffer to a string
    match String::from_utf8(buffer) {
        Ok(metrics_string) => metrics_string.into_response(),
        Err(e) => {
            warn!("Failed to convert metrics to string: {}", e);
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "Failed to convert metrics to string").into_response()
        }
    }
}
