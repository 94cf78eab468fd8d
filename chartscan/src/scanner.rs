use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::chart::{unpack_documents, ChartSource, HttpChartSource};
use crate::config::AppConfig;
use crate::extract::{extract_from_document, is_yaml_document};
use crate::inspect::RegistryInspector;
use crate::models::{ImageInfo, ReferenceSet};
use crate::scheduler::InspectionScheduler;

/// Errors that abort a whole scan
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("downloading chart: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("bad status downloading chart: {0}")]
    Status(reqwest::StatusCode),

    #[error("chart exceeds the {0} byte limit")]
    TooLarge(u64),

    #[error("reading chart archive: {0}")]
    Unpack(#[source] std::io::Error),

    #[error("chart processing task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

/// Outcome of one successful scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Images that were inspected successfully, in no particular order
    pub images: Vec<ImageInfo>,
    /// Unique references found in the chart
    pub discovered: usize,
    pub documents_scanned: usize,
    /// Documents that failed to parse, fully or partially
    pub documents_skipped: usize,
}

impl ScanReport {
    pub fn inspection_failures(&self) -> usize {
        self.discovered - self.images.len()
    }
}

/// References found in an archive before any registry is contacted
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub references: ReferenceSet,
    pub documents_scanned: usize,
    pub documents_skipped: usize,
}

pub const DEFAULT_MAX_UNPACKED_BYTES: u64 = 200 * 1024 * 1024;

pub struct ChartScanner {
    source: Arc<dyn ChartSource>,
    scheduler: InspectionScheduler,
    max_unpacked_bytes: u64,
}

impl ChartScanner {
    pub fn new(source: Arc<dyn ChartSource>, scheduler: InspectionScheduler) -> Self {
        Self {
            source,
            scheduler,
            max_unpacked_bytes: DEFAULT_MAX_UNPACKED_BYTES,
        }
    }

    /// Cap the decompressed size of a chart.
    pub fn with_unpack_limit(mut self, max_unpacked_bytes: u64) -> Self {
        self.max_unpacked_bytes = max_unpacked_bytes;
        self
    }

    /// Wire the HTTP chart source and the registry inspector from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ScanError> {
        let source = HttpChartSource::new(config.scan.fetch_timeout(), config.scan.max_chart_bytes)?;
        let scheduler = InspectionScheduler::new(
            Arc::new(RegistryInspector::new(&config.registry)),
            config.scan.concurrency,
            config.scan.inspect_timeout(),
        );

        Ok(Self::new(Arc::new(source), scheduler).with_unpack_limit(config.scan.max_unpacked_bytes))
    }

    /// Collect the image references of every YAML document in a chart archive.
    pub fn discover(archive: &[u8], max_unpacked_bytes: u64) -> Result<Discovery, ScanError> {
        let documents = unpack_documents(archive, is_yaml_document, max_unpacked_bytes)?;

        let mut references = ReferenceSet::new();
        let mut skipped = 0;

        for document in &documents {
            let outcome = extract_from_document(&document.content, &mut references);
            if let Some(e) = outcome.error {
                skipped += 1;
                warn!(
                    "Skipping unparsable YAML in {} after {} document(s): {}",
                    document.name, outcome.parsed, e
                );
            }
        }

        Ok(Discovery {
            references,
            documents_scanned: documents.len(),
            documents_skipped: skipped,
        })
    }

    /// Download a chart, find its images and inspect each of them.
    #[instrument(name = "scan", skip(self))]
    pub async fn scan(&self, chart_url: &str) -> Result<ScanReport, ScanError> {
        let archive = self.source.fetch(chart_url).await?;
        let limit = self.max_unpacked_bytes;

        // Gunzip, tar and YAML parsing are CPU bound
        let discovery = tokio::task::spawn_blocking(move || Self::discover(&archive, limit))
            .await
            .map_err(ScanError::Task)??;

        info!(
            "Found {} unique images in {} documents",
            discovery.references.len(),
            discovery.documents_scanned
        );

        let images = self.scheduler.run(&discovery.references).await;

        Ok(ScanReport {
            images,
            discovered: discovery.references.len(),
            documents_scanned: discovery.documents_scanned,
            documents_skipped: discovery.documents_skipped,
        })
    }
}
