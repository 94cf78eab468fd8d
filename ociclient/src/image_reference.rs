use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::digest::{DigestError, OciDigest};

/// Registry assumed when a reference names none
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Host that actually serves the Docker Hub distribution API
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

const DEFAULT_TAG: &str = "latest";

/// Error type for image reference parsing
#[derive(Debug, Error)]
pub enum ImageReferenceError {
    #[error("Invalid image reference format: {0}")]
    InvalidFormat(String),
    #[error("Invalid digest in image reference: {0}")]
    InvalidDigest(#[from] DigestError),
}

/// Represents an OCI image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, with port if present
    pub registry: String,
    /// Repository path inside the registry
    pub repository: String,
    /// Tag, `latest` when neither tag nor digest was given
    pub tag: Option<String>,
    /// Content digest, takes precedence over the tag when resolving
    pub digest: Option<OciDigest>,
}

impl ImageReference {
    /// The tag or digest to request from the manifests endpoint.
    pub fn target(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => digest.to_string(),
            (None, Some(tag)) => tag.clone(),
            (None, None) => DEFAULT_TAG.to_string(),
        }
    }

    /// The host serving the distribution API for this registry.
    pub fn api_host(&self) -> &str {
        match self.registry.as_str() {
            "docker.io" | "index.docker.io" => DOCKER_HUB_API_HOST,
            other => other,
        }
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

impl FromStr for ImageReference {
    type Err = ImageReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ImageReferenceError::InvalidFormat(s.to_string());

        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        // Parse image reference in the format: [registry/]repository[:tag][@digest]
        let (name, digest) = match s.split_once('@') {
            Some((name, digest)) => (name, Some(OciDigest::from_str(digest)?)),
            None => (s, None),
        };

        // A tag separator only counts after the last path component starts,
        // otherwise `localhost:5000/app` would be read as tag `5000/app`.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match name[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                (&name[..split], Some(name[split + 1..].to_string()))
            }
            None => (name, None),
        };

        if tag.as_deref() == Some("") {
            return Err(invalid());
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid());
        }

        // Official images live under `library/` on Docker Hub
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
