use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Unique image reference strings discovered in a chart, compared verbatim
pub type ReferenceSet = BTreeSet<String>;

/// Size information for one successfully inspected image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// The reference exactly as it appeared in the chart
    pub image: String,
    /// Sum of the compressed layer sizes reported by the registry
    pub size_bytes: u64,
    /// Number of layers in the image manifest
    pub layers: usize,
}
