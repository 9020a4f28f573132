//! Error types for scans

use http::StatusCode;

use crate::validator::ValidatorInputError;

/// The release call did not release the image.
#[derive(Debug, thiserror::Error)]
pub enum ClearanceError {
    /// The release request could not be built or sent.
    #[error("sending release request: {0}")]
    Request(#[source] registry_client::Error),

    /// The registry did not answer within the release timeout.
    #[error("release request timed out")]
    Timeout,

    /// The registry answered with something other than `200 OK`.
    #[error("registry refused release: {status} {message}")]
    Rejected {
        /// Response status
        status: StatusCode,
        /// Response body
        message: String,
    },

    /// The release body could not be encoded.
    #[error("encoding release body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<registry_client::Error> for ClearanceError {
    fn from(err: registry_client::Error) -> Self {
        match err {
            registry_client::Error::Timeout(_) => ClearanceError::Timeout,
            other => ClearanceError::Request(other),
        }
    }
}

/// A scan stopped before reaching a verdict for every layer, or the release failed.
///
/// None of these leave the image released.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// No transport is configured for the registry named in the event.
    #[error("no credentials configured for registry {0}")]
    UnknownRegistry(String),

    /// The manifest could not be fetched or parsed.
    #[error("fetching manifest: {0}")]
    Manifest(#[source] registry_client::Error),

    /// A layer blob could not be fetched.
    #[error("fetching layer {digest}: {source}")]
    Blob {
        /// The layer digest
        digest: String,
        /// The fetch error
        #[source]
        source: registry_client::Error,
    },

    /// A layer could not be decoded for validation.
    #[error("reading layer {digest}: {source}")]
    ValidatorInput {
        /// The layer digest
        digest: String,
        /// The decode error
        #[source]
        source: ValidatorInputError,
    },

    /// Every layer passed, but the release call failed.
    #[error("clearing quarantine: {0}")]
    Clearance(#[from] ClearanceError),
}
