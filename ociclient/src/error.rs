use reqwest::StatusCode;
use thiserror::Error;

/// Errors reported by a registry while resolving a manifest
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Manifest not found: {0}")]
    NotFound(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: StatusCode, url: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Unsupported manifest type: {0}")]
    UnsupportedManifest(String),

    #[error("Manifest exceeds the {0} byte limit")]
    ManifestTooLarge(u64),

    #[error("No manifest for platform {0}")]
    NoMatchingPlatform(String),
}
