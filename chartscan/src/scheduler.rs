//! Bounded fan-out of registry inspections.
//!
//! Every unique reference gets its own task. A semaphore caps how many tasks
//! talk to registries at once, and each task has its own deadline that starts
//! once it holds a permit. Failures and timeouts are logged and dropped; they
//! never cancel sibling tasks. `run` returns only after every task finished.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::inspect::ImageInspector;
use crate::models::{ImageInfo, ReferenceSet};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_INSPECT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct InspectionScheduler {
    inspector: Arc<dyn ImageInspector>,
    concurrency: usize,
    timeout: Duration,
}

impl InspectionScheduler {
    /// `concurrency` is clamped to at least one slot.
    pub fn new(inspector: Arc<dyn ImageInspector>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            inspector,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Inspect every reference and return the images that succeeded, in no
    /// particular order.
    pub async fn run(&self, references: &ReferenceSet) -> Vec<ImageInfo> {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut jobs = JoinSet::new();

        for reference in references {
            let reference = reference.clone();
            let slots = Arc::clone(&slots);
            let inspector = Arc::clone(&self.inspector);
            let timeout = self.timeout;

            jobs.spawn(async move {
                let result = inspect_one(inspector.as_ref(), &slots, &reference, timeout).await;
                (reference, result)
            });
        }

        let mut images = Vec::with_capacity(references.len());
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((_, Ok(info))) => images.push(info),
                Ok((reference, Err(e))) => {
                    warn!("Failed to inspect image {}: {:#}", reference, e);
                }
                Err(e) => {
                    warn!("Inspection task aborted: {}", e);
                }
            }
        }

        info!(
            "Inspected {} of {} images",
            images.len(),
            references.len()
        );
        images
    }
}

async fn inspect_one(
    inspector: &dyn ImageInspector,
    slots: &Semaphore,
    reference: &str,
    timeout: Duration,
) -> anyhow::Result<ImageInfo> {
    // The semaphore is never closed
    let _permit = slots.acquire().await?;
    debug!("Inspecting {}", reference);

    let sizes = tokio::time::timeout(timeout, inspector.layer_sizes(reference))
        .await
        .map_err(|_| anyhow!("timed out after {:?}", timeout))??;

    let mut total: u64 = 0;
    for (index, size) in sizes.iter().enumerate() {
        let size = size.ok_or_else(|| anyhow!("size of layer {} is unknown", index))?;
        total = total
            .checked_add(size)
            .ok_or_else(|| anyhow!("total layer size overflows"))?;
    }

    Ok(ImageInfo {
        image: reference.to_string(),
        size_bytes: total,
        layers: sizes.len(),
    })
}
