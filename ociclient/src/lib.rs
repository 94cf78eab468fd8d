pub mod client;
pub mod digest;
pub mod error;
pub mod image_reference;
pub mod models;

// Re-export main client types for convenience
pub use client::{basic_auth, BearerChallenge, Client, ClientSession};
pub use digest::OciDigest;
pub use error::RegistryError;
pub use image_reference::ImageReference;
pub use models::{Descriptor, ImageManifest, ImageManifestList, ManifestVariant, Platform};
