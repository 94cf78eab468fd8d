use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// Error type for OCI digest operations
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("Invalid digest format: {0}")]
    InvalidFormat(String),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Represents an OCI content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OciDigest {
    algorithm: String,
    hex: String,
}

impl OciDigest {
    /// Compute the sha256 digest of the given content
    pub fn sha256(content: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            hex: hex::encode(Sha256::digest(content)),
        }
    }

    /// Get the algorithm part of the digest
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Get the hex part of the digest
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Check that `content` hashes to this digest using the same algorithm.
    pub fn verify(&self, content: &[u8]) -> Result<(), DigestError> {
        let actual = match self.algorithm.as_str() {
            "sha256" => hex::encode(Sha256::digest(content)),
            "sha512" => hex::encode(Sha512::digest(content)),
            other => return Err(DigestError::UnsupportedAlgorithm(other.to_string())),
        };

        if actual != self.hex {
            return Err(DigestError::Mismatch {
                expected: self.to_string(),
                actual: format!("{}:{}", self.algorithm, actual),
            });
        }

        Ok(())
    }
}

impl fmt::Display for OciDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for OciDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| DigestError::InvalidFormat(s.to_string()))?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            _ => return Err(DigestError::UnsupportedAlgorithm(algorithm.to_string())),
        };

        // Registries only ever emit lowercase hex
        if hex.len() != expected_len
            || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(DigestError::InvalidFormat(s.to_string()));
        }

        Ok(OciDigest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }
}

impl serde::Serialize for OciDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for OciDigest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OciDigest::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_sha256() {
        let digest = OciDigest::from_str(EMPTY_SHA256).unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn test_parse_rejects_short_hex() {
        assert!(matches!(
            OciDigest::from_str("sha256:abcd"),
            Err(DigestError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_algorithm() {
        assert!(matches!(
            OciDigest::from_str("md5:d41d8cd98f00b204e9800998ecf8427e"),
            Err(DigestError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_sha256_of_content() {
        assert_eq!(OciDigest::sha256(b"").to_string(), EMPTY_SHA256);
    }

    #[test]
    fn test_verify() {
        let digest = OciDigest::from_str(EMPTY_SHA256).unwrap();
        assert!(digest.verify(b"").is_ok());
        assert!(matches!(
            digest.verify(b"tampered"),
            Err(DigestError::Mismatch { .. })
        ));
    }
}
