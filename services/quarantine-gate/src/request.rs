//! The image a scan is about.

use std::fmt;

use serde::Serialize;

/// A field of a [`ScanRequest`] was empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scan request is missing its {0}")]
pub struct MissingField(pub &'static str);

/// Identifies one quarantined image: where it lives and which manifest to scan.
///
/// All three fields are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRequest {
    registry_host: String,
    repository: String,
    digest: String,
}

impl ScanRequest {
    /// Create a request, rejecting empty fields.
    pub fn new(
        registry_host: impl Into<String>,
        repository: impl Into<String>,
        digest: impl Into<String>,
    ) -> Result<Self, MissingField> {
        let request = Self {
            registry_host: registry_host.into(),
            repository: repository.into(),
            digest: digest.into(),
        };

        if request.registry_host.is_empty() {
            return Err(MissingField("registry host"));
        }
        if request.repository.is_empty() {
            return Err(MissingField("repository"));
        }
        if request.digest.is_empty() {
            return Err(MissingField("digest"));
        }

        Ok(request)
    }

    /// The registry host, e.g. `myregistry.azurecr.io`.
    pub fn registry_host(&self) -> &str {
        &self.registry_host
    }

    /// The repository name.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The manifest digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for ScanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.registry_host, self.repository, self.digest)
    }
}
