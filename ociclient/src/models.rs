use serde::{Deserialize, Serialize};

use crate::digest::OciDigest;
use crate::error::RegistryError;

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Represents a descriptor for a content blob in an OCI registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    #[serde(default)]
    pub media_type: String,
    /// Digest of the referenced content
    pub digest: OciDigest,
    /// Size of the referenced content in bytes, absent in malformed manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Optional platform information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Represents platform information for a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Operating system
    pub os: String,
    /// CPU architecture
    pub architecture: String,
    /// Optional variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Whether a candidate platform from an index satisfies this one.
    /// A missing variant on either side matches any variant.
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && match (&self.variant, &candidate.variant) {
                (Some(wanted), Some(got)) => wanted == got,
                _ => true,
            }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Represents an OCI image manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Schema version of the manifest
    pub schema_version: i32,
    /// Media type of the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Descriptor for the config blob
    pub config: Descriptor,
    /// Descriptors for the layer blobs
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ImageManifest {
    /// Size of every layer as reported by the manifest.
    pub fn layer_sizes(&self) -> Vec<Option<u64>> {
        self.layers.iter().map(|layer| layer.size).collect()
    }
}

/// Represents an OCI image index or Docker manifest list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifestList {
    /// Schema version of the manifest list
    pub schema_version: i32,
    /// Media type of the manifest list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// List of manifests
    pub manifests: Vec<Descriptor>,
}

impl ImageManifestList {
    /// Pick the manifest for `platform`, falling back to the first entry that
    /// declares no platform at all.
    pub fn select_platform(&self, platform: &Platform) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|m| m.platform.as_ref().is_some_and(|p| platform.matches(p)))
            .or_else(|| self.manifests.iter().find(|m| m.platform.is_none()))
    }
}

/// Enum representing different types of OCI manifests
#[derive(Debug, Clone)]
pub enum ManifestVariant {
    /// Single-platform image manifest
    Manifest(ImageManifest),
    /// Multi-platform index
    List(ImageManifestList),
}

impl ManifestVariant {
    /// Decode a manifest body. The `Content-Type` reported by the registry is
    /// preferred; when it is missing or generic the body's own `mediaType`
    /// and finally its shape decide.
    pub fn from_slice(content_type: Option<&str>, body: &[u8]) -> Result<Self, RegistryError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| RegistryError::InvalidManifest(e.to_string()))?;

        let declared = content_type
            .filter(|ct| ct.starts_with("application/vnd."))
            .map(str::to_string)
            .or_else(|| {
                value
                    .get("mediaType")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            });

        let is_list = match declared.as_deref() {
            Some(OCI_INDEX_MEDIA_TYPE | DOCKER_MANIFEST_LIST_MEDIA_TYPE) => true,
            Some(OCI_MANIFEST_MEDIA_TYPE | DOCKER_MANIFEST_MEDIA_TYPE) => false,
            Some(other) if value.get("fsLayers").is_some() => {
                return Err(RegistryError::UnsupportedManifest(other.to_string()));
            }
            _ if value.get("manifests").is_some() => true,
            _ if value.get("layers").is_some() => false,
            other => {
                return Err(RegistryError::UnsupportedManifest(
                    other.unwrap_or("unknown").to_string(),
                ));
            }
        };

        let decoded = if is_list {
            serde_json::from_value(value).map(ManifestVariant::List)
        } else {
            serde_json::from_value(value).map(ManifestVariant::Manifest)
        };

        decoded.map_err(|e| RegistryError::InvalidManifest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
    const LAYER_A: &str = "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const LAYER_B: &str = "sha256:bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn manifest_json(sizes: &[Option<u64>]) -> String {
        let layers: Vec<serde_json::Value> = sizes
            .iter()
            .zip([LAYER_A, LAYER_B])
            .map(|(size, digest)| {
                let mut layer = serde_json::json!({
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": digest,
                });
                if let Some(size) = size {
                    layer["size"] = serde_json::json!(size);
                }
                layer
            })
            .collect();

        serde_json::json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST_MEDIA_TYPE,
            "config": { "mediaType": "application/vnd.oci.image.config.v1+json", "digest": CONFIG, "size": 7 },
            "layers": layers,
        })
        .to_string()
    }

    #[test]
    fn test_decode_image_manifest() {
        let body = manifest_json(&[Some(100), Some(23)]);
        let variant = ManifestVariant::from_slice(None, body.as_bytes()).unwrap();
        let ManifestVariant::Manifest(manifest) = variant else {
            panic!("expected image manifest");
        };
        assert_eq!(manifest.layer_sizes(), vec![Some(100), Some(23)]);
    }

    #[test]
    fn test_missing_layer_size_is_reported() {
        let body = manifest_json(&[Some(100), None]);
        let variant = ManifestVariant::from_slice(Some(OCI_MANIFEST_MEDIA_TYPE), body.as_bytes())
            .unwrap();
        let ManifestVariant::Manifest(manifest) = variant else {
            panic!("expected image manifest");
        };
        assert_eq!(manifest.layer_sizes(), vec![Some(100), None]);
    }

    #[test]
    fn test_decode_index_and_select_platform() {
        let body = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [
                { "mediaType": OCI_MANIFEST_MEDIA_TYPE, "digest": LAYER_A, "size": 1,
                  "platform": { "os": "linux", "architecture": "arm64", "variant": "v8" } },
                { "mediaType": OCI_MANIFEST_MEDIA_TYPE, "digest": LAYER_B, "size": 1,
                  "platform": { "os": "linux", "architecture": "amd64" } },
            ]
        })
        .to_string();

        let variant = ManifestVariant::from_slice(Some("application/json"), body.as_bytes()).unwrap();
        let ManifestVariant::List(list) = variant else {
            panic!("expected index");
        };

        let amd64 = list.select_platform(&Platform::new("linux", "amd64")).unwrap();
        assert_eq!(amd64.digest.to_string(), LAYER_B);

        let arm64 = list.select_platform(&Platform::new("linux", "arm64")).unwrap();
        assert_eq!(arm64.digest.to_string(), LAYER_A);

        assert!(list.select_platform(&Platform::new("windows", "amd64")).is_none());
    }

    #[test]
    fn test_schema1_is_unsupported() {
        let body = r#"{"schemaVersion":1,"mediaType":"application/vnd.docker.distribution.manifest.v1+prettyjws","fsLayers":[]}"#;
        assert!(matches!(
            ManifestVariant::from_slice(None, body.as_bytes()),
            Err(RegistryError::UnsupportedManifest(_))
        ));
    }
}
