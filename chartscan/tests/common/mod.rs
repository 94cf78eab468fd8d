#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use chartscan::chart::HttpChartSource;
use chartscan::inspect::ImageInspector;
use chartscan::scanner::ChartScanner;
use chartscan::scheduler::InspectionScheduler;

// Build an in-memory .tgz with the given files
pub fn build_chart(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}

// Serve each archive at its path; everything else is a 404
pub async fn start_chart_server(charts: Vec<(&'static str, Vec<u8>)>) -> (JoinHandle<()>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut app = Router::new();
    for (path, archive) in charts {
        app = app.route(
            path,
            get(move || {
                let archive = archive.clone();
                async move { archive }
            }),
        );
    }
    let app = app.fallback(|| async { (StatusCode::NOT_FOUND, "no such chart") });

    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (server, format!("http://127.0.0.1:{}", port))
}

// Registry double answering from a fixed table
pub struct StaticInspector {
    pub layers: HashMap<String, Vec<Option<u64>>>,
}

impl StaticInspector {
    pub fn new(images: &[(&str, &[u64])]) -> Self {
        let layers = images
            .iter()
            .map(|(name, sizes)| (name.to_string(), sizes.iter().copied().map(Some).collect()))
            .collect();
        Self { layers }
    }
}

#[async_trait]
impl ImageInspector for StaticInspector {
    async fn layer_sizes(&self, reference: &str) -> anyhow::Result<Vec<Option<u64>>> {
        self.layers
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("MANIFEST_UNKNOWN: {}", reference))
    }
}

pub fn scanner_with(inspector: StaticInspector) -> ChartScanner {
    let source = HttpChartSource::new(Duration::from_secs(10), 1024 * 1024).unwrap();
    let scheduler = InspectionScheduler::new(Arc::new(inspector), 2, Duration::from_secs(10));
    ChartScanner::new(Arc::new(source), scheduler)
}
