use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use ociclient::{basic_auth, Client, ImageReference, Platform};
use tracing::debug;

use crate::config::RegistryConfig;

/// Looks up the layers of an image in its registry.
#[async_trait]
pub trait ImageInspector: Send + Sync {
    /// Size of every layer of `reference`, in manifest order. `None` marks a
    /// layer whose size the registry did not report.
    async fn layer_sizes(&self, reference: &str) -> anyhow::Result<Vec<Option<u64>>>;
}

/// `ImageInspector` backed by the OCI distribution API.
pub struct RegistryInspector {
    http: reqwest::Client,
    platform: Platform,
    insecure: HashSet<String>,
    /// Encoded basic credentials by lowercase registry host
    credentials: HashMap<String, String>,
}

impl RegistryInspector {
    pub fn new(config: &RegistryConfig) -> Self {
        let credentials = config
            .credentials
            .iter()
            .map(|(host, creds)| {
                (host.to_ascii_lowercase(), basic_auth(&creds.username, &creds.password))
            })
            .collect();

        Self {
            http: reqwest::Client::new(),
            platform: Platform::new(&config.platform_os, &config.platform_arch),
            insecure: config.insecure.iter().cloned().collect(),
            credentials,
        }
    }

    // Credentials only ever go to the host they were configured for
    fn credentials_for(&self, reference: &ImageReference) -> Option<String> {
        [reference.registry.as_str(), reference.api_host()]
            .iter()
            .find_map(|host| self.credentials.get(&host.to_ascii_lowercase()))
            .cloned()
    }

    fn registry_url(&self, reference: &ImageReference) -> String {
        let scheme = if self.insecure.contains(&reference.registry) {
            "http"
        } else {
            "https"
        };
        format!("{}://{}", scheme, reference.api_host())
    }
}

#[async_trait]
impl ImageInspector for RegistryInspector {
    async fn layer_sizes(&self, reference: &str) -> anyhow::Result<Vec<Option<u64>>> {
        let parsed = ImageReference::from_str(reference)?;

        let client = Client::with_http_client(
            self.registry_url(&parsed),
            self.credentials_for(&parsed),
            self.http.clone(),
        );
        let mut session = client.new_session(parsed.repository.clone());

        let manifest = session
            .resolve_image_manifest(&parsed.target(), &self.platform)
            .await?;

        debug!(
            "Resolved {} to {} layers via {}",
            reference,
            manifest.layers.len(),
            client.registry_url()
        );

        Ok(manifest.layer_sizes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, RegistryCredentials};

    #[test]
    fn test_registry_url_scheme() {
        let mut config = AppConfig::default().registry;
        config.insecure = vec!["localhost:5000".to_string()];
        let inspector = RegistryInspector::new(&config);

        let local: ImageReference = "localhost:5000/app:1".parse().unwrap();
        assert_eq!(inspector.registry_url(&local), "http://localhost:5000");

        let hub: ImageReference = "nginx:1.25".parse().unwrap();
        assert_eq!(inspector.registry_url(&hub), "https://registry-1.docker.io");
    }

    #[test]
    fn test_credentials_are_scoped_to_their_host() {
        let mut config = AppConfig::default().registry;
        config.credentials.insert(
            "GHCR.io".to_string(),
            RegistryCredentials {
                username: "user".to_string(),
                password: "pass".to_string(),
            },
        );
        let inspector = RegistryInspector::new(&config);

        let own: ImageReference = "ghcr.io/org/app:1".parse().unwrap();
        assert_eq!(inspector.credentials_for(&own).as_deref(), Some("dXNlcjpwYXNz"));

        let other: ImageReference = "evil.example.com/org/app:1".parse().unwrap();
        assert_eq!(inspector.credentials_for(&other), None);

        let hub: ImageReference = "nginx:1.25".parse().unwrap();
        assert_eq!(inspector.credentials_for(&hub), None);
    }

    #[tokio::test]
    async fn test_malformed_reference_fails_inspection() {
        let inspector = RegistryInspector::new(&AppConfig::default().registry);
        assert!(inspector.layer_sizes("not a reference").await.is_err());
    }
}
