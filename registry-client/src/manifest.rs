//! Image manifest model.

use serde::{Deserialize, Serialize};

/// OCI image manifest media type.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Docker v2 schema 2 manifest media type.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The layers of an image, in the order the manifest lists them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageManifest {
    /// Layer descriptors. A manifest without a `layers` array (an index, for
    /// example) is not an image manifest and fails to parse.
    pub layers: Vec<LayerDescriptor>,
}

impl ImageManifest {
    /// Parse a manifest document.
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// A content-addressed layer of an image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    /// The layer digest, e.g. `sha256:...`
    pub digest: String,

    /// The layer media type.
    #[serde(default)]
    pub media_type: String,

    /// The layer size in bytes.
    #[serde(default)]
    pub size: u64,
}

impl std::fmt::Display for LayerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {} bytes)", self.digest, self.media_type, self.size)
    }
}
