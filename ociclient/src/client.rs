use std::str::FromStr;

use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{header, Client as ReqwestClient, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::digest::OciDigest;
use crate::error::RegistryError;
use crate::models::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, ImageManifest, ManifestVariant,
    OCI_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE, Platform,
};

/// Largest manifest body accepted from a registry
pub const MAX_MANIFEST_BYTES: u64 = 4 * 1024 * 1024;

/// Encode `username:password` for a `Basic` authorization header.
pub fn basic_auth(username: &str, password: &str) -> String {
    STANDARD.encode(format!("{}:{}", username, password))
}

/// A client for interacting with an OCI registry.
pub struct Client {
    registry_url: String,
    auth: Option<String>,
    client: ReqwestClient,
}

impl Client {
    /// Create a new client for the given registry URL.
    pub fn new(registry_url: String, auth: Option<String>) -> Self {
        Self::with_http_client(registry_url, auth, ReqwestClient::new())
    }

    /// Create a client that reuses an existing connection pool.
    pub fn with_http_client(registry_url: String, auth: Option<String>, client: ReqwestClient) -> Self {
        Self {
            registry_url: registry_url.trim_end_matches('/').to_string(),
            auth,
            client,
        }
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Create a new session for the given repository.
    pub fn new_session(&self, repository: String) -> ClientSession {
        ClientSession {
            repository,
            registry_url: self.registry_url.clone(),
            client: self.client.clone(),
            auth: self.auth.clone(),
            token: None,
        }
    }
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse the header value. Quoted values may contain commas, as in
    /// `scope="repository:app:pull,push"`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        let mut rest = params.trim();
        while !rest.is_empty() {
            let eq_pos = rest.find('=')?;
            let key = rest[..eq_pos].trim().to_ascii_lowercase();
            rest = rest[eq_pos + 1..].trim_start();

            let value = if let Some(quoted) = rest.strip_prefix('"') {
                let end = quoted.find('"')?;
                rest = &quoted[end + 1..];
                &quoted[..end]
            } else {
                let end = rest.find(',').unwrap_or(rest.len());
                let value = rest[..end].trim();
                rest = &rest[end..];
                value
            };
            rest = rest.trim_start().trim_start_matches(',').trim_start();

            match key.as_str() {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }
}

// Token authentication response from the auth service. Docker Hub sends
// both fields, other registries only one of them.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// A manifest as returned by the registry, before platform resolution.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    /// Digest of the exact bytes the registry served
    pub digest: OciDigest,
    pub manifest: ManifestVariant,
}

/// A session for interacting with a specific repository in an OCI registry.
pub struct ClientSession {
    repository: String,
    registry_url: String,
    client: ReqwestClient,
    auth: Option<String>,
    token: Option<String>,
}

impl ClientSession {
    fn build_request(&self, method: Method, url: &str, accept: Option<&str>) -> RequestBuilder {
        let mut request = self.client.request(method, url);

        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }

        // If we have a token, add it to the request
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        // If we have basic auth credentials, add them to the request
        else if let Some(auth) = &self.auth {
            request = request.header(header::AUTHORIZATION, format!("Basic {}", auth));
        }

        request
    }

    /// Fetch a bearer token for the given challenge. Returns `None` when the
    /// auth service refuses, so the caller can surface the original 401.
    async fn request_token(&self, challenge: &BearerChallenge) -> Result<Option<String>> {
        let mut token_url = reqwest::Url::parse(&challenge.realm)?;

        if let Some(service) = &challenge.service {
            token_url.query_pairs_mut().append_pair("service", service);
        }
        let scope = challenge
            .scope
            .clone()
            .unwrap_or_else(|| format!("repository:{}:pull", self.repository));
        token_url.query_pairs_mut().append_pair("scope", &scope);

        let mut token_request = self.client.get(token_url);

        // Add basic auth if we have it
        if let Some(auth) = &self.auth {
            token_request = token_request.header(header::AUTHORIZATION, format!("Basic {}", auth));
        }

        let token_response = token_request.send().await?;
        if !token_response.status().is_success() {
            debug!(
                "Token request for {} failed with {}",
                self.repository,
                token_response.status()
            );
            return Ok(None);
        }

        let token_data: TokenResponse = token_response.json().await?;
        Ok(token_data.token.or(token_data.access_token))
    }

    /// Handle authentication for requests to the registry.
    /// This method will automatically obtain a token if needed.
    async fn authenticate_request(
        &mut self,
        method: Method,
        url: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response> {
        let response = self.build_request(method.clone(), url, accept).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .and_then(BearerChallenge::parse);

        let Some(challenge) = challenge else {
            return Ok(response);
        };

        match self.request_token(&challenge).await? {
            Some(token) => {
                debug!("Obtained bearer token for {}", self.repository);
                self.token = Some(token);
                Ok(self.build_request(method, url, accept).send().await?)
            }
            None => Ok(response),
        }
    }

    /// Make an authenticated GET request to the registry.
    async fn authenticated_get(&mut self, url: &str, accept: &str) -> Result<reqwest::Response> {
        self.authenticate_request(Method::GET, url, Some(accept)).await
    }

    /// Fetch the manifest stored under a tag or digest. When `reference` is a
    /// digest the served bytes are verified against it.
    pub async fn fetch_manifest(&mut self, reference: &str) -> Result<FetchedManifest> {
        let url = format!("{}/v2/{}/manifests/{}", self.registry_url, self.repository, reference);
        let accept = [
            OCI_INDEX_MEDIA_TYPE,
            OCI_MANIFEST_MEDIA_TYPE,
            DOCKER_MANIFEST_LIST_MEDIA_TYPE,
            DOCKER_MANIFEST_MEDIA_TYPE,
        ]
        .join(", ");

        let mut response = self.authenticated_get(&url, &accept).await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(RegistryError::NotFound(format!("{}:{}", self.repository, reference)).into());
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(RegistryError::Unauthorized(self.repository.clone()).into());
            }
            status => {
                return Err(RegistryError::UnexpectedStatus { status, url }.into());
            }
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

        if response.content_length().is_some_and(|length| length > MAX_MANIFEST_BYTES) {
            return Err(RegistryError::ManifestTooLarge(MAX_MANIFEST_BYTES).into());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (body.len() + chunk.len()) as u64 > MAX_MANIFEST_BYTES {
                return Err(RegistryError::ManifestTooLarge(MAX_MANIFEST_BYTES).into());
            }
            body.extend_from_slice(&chunk);
        }

        if let Ok(expected) = OciDigest::from_str(reference) {
            expected.verify(&body)?;
        }

        let manifest = ManifestVariant::from_slice(content_type.as_deref(), &body)?;

        Ok(FetchedManifest {
            digest: OciDigest::sha256(&body),
            manifest,
        })
    }

    /// Resolve a tag or digest to a single-platform image manifest, following
    /// an index to the entry for `platform`.
    pub async fn resolve_image_manifest(
        &mut self,
        reference: &str,
        platform: &Platform,
    ) -> Result<ImageManifest> {
        let fetched = self.fetch_manifest(reference).await?;

        let list = match fetched.manifest {
            ManifestVariant::Manifest(manifest) => return Ok(manifest),
            ManifestVariant::List(list) => list,
        };

        let descriptor = list
            .select_platform(platform)
            .ok_or_else(|| RegistryError::NoMatchingPlatform(platform.to_string()))?;

        debug!(
            "Resolved {}:{} for {} to {}",
            self.repository, reference, platform, descriptor.digest
        );

        match self.fetch_manifest(&descriptor.digest.to_string()).await?.manifest {
            ManifestVariant::Manifest(manifest) => Ok(manifest),
            ManifestVariant::List(_) => {
                Err(RegistryError::UnsupportedManifest("nested index".to_string()).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_docker_hub_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:library/nginx:pull"));
    }

    #[test]
    fn test_parse_challenge_with_comma_in_scope() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://ghcr.io/token", scope="repository:org/app:pull,push""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "https://ghcr.io/token");
        assert_eq!(challenge.service, None);
        assert_eq!(challenge.scope.as_deref(), Some("repository:org/app:pull,push"));
    }

    #[test]
    fn test_parse_rejects_basic_and_missing_realm() {
        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="registry""#).is_none());
    }

    #[test]
    fn test_basic_auth_encoding() {
        assert_eq!(basic_auth("user", "pass"), "dXNlcjpwYXNz");
    }

    #[test]
    fn test_registry_url_is_normalized() {
        let client = Client::new("https://registry.example.com/".to_string(), None);
        assert_eq!(client.registry_url(), "https://registry.example.com");
    }
}
