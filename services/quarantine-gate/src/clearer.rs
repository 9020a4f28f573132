//! Releasing an image from quarantine.

use std::time::Duration;

use bytes::Bytes;
use http::{StatusCode, header};
use registry_client::{HttpResponseError, RegistryTransport};
use registry_client::uri::endpoint;
use serde::Serialize;

use crate::error::ClearanceError;
use crate::request::ScanRequest;

/// Audit link recorded in the release details when none is configured.
pub const DEFAULT_AUDIT_LINK: &str = "http://example.com";

/// Upper bound on the whole release call when none is configured.
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(30);

const QUARANTINE_PASSED: &str = "Passed";
const SCAN_PASSED: &str = "scan passed";

/// The registry's answer to a successful release call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Response status, always `200 OK`.
    pub status: StatusCode,
    /// Response body.
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseBody {
    quarantine_state: &'static str,
    /// A JSON document, encoded as a string.
    quarantine_details: String,
}

#[derive(Debug, Serialize)]
struct QuarantineDetails<'a> {
    state: &'static str,
    link: &'a str,
}

/// Issues the administrative call marking a quarantined manifest as passed.
///
/// The call is sent once and never retried; releasing an already released
/// manifest is a no-op on the registry side.
#[derive(Debug, Clone)]
pub struct QuarantineClearer {
    audit_link: String,
    timeout: Duration,
}

impl Default for QuarantineClearer {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_LINK, DEFAULT_RELEASE_TIMEOUT)
    }
}

impl QuarantineClearer {
    /// Create a clearer recording `audit_link` and giving up after `timeout`.
    pub fn new(audit_link: impl Into<String>, timeout: Duration) -> Self {
        Self {
            audit_link: audit_link.into(),
            timeout,
        }
    }

    /// The JSON body of the release call.
    pub fn body(&self) -> Result<Bytes, serde_json::Error> {
        let details = serde_json::to_string(&QuarantineDetails {
            state: SCAN_PASSED,
            link: &self.audit_link,
        })?;

        let body = serde_json::to_vec(&ReleaseBody {
            quarantine_state: QUARANTINE_PASSED,
            quarantine_details: details,
        })?;
        Ok(body.into())
    }

    /// Release `request`'s manifest from quarantine through `transport`.
    ///
    /// Only `200 OK` counts as released.
    #[tracing::instrument(level = "debug", skip_all, fields(image = %request))]
    pub async fn clear(
        &self,
        transport: &RegistryTransport,
        request: &ScanRequest,
    ) -> Result<ReleaseOutcome, ClearanceError> {
        match tokio::time::timeout(self.timeout, self.send(transport, request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "Timed out clearing quarantine flag for {}@{}",
                    request.repository(),
                    request.digest()
                );
                Err(ClearanceError::Timeout)
            }
        }
    }

    async fn send(
        &self,
        transport: &RegistryTransport,
        request: &ScanRequest,
    ) -> Result<ReleaseOutcome, ClearanceError> {
        let path = endpoint(["acr/v1", request.repository(), "_manifests", request.digest()]);

        let response = transport
            .patch(&path)?
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(self.body()?)
            .send()
            .await?;

        let status = response.status();
        let message = match response.prefix(HttpResponseError::MESSAGE_LIMIT).await {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(err) => format!("Failed to read response body: {err}"),
        };

        if status != StatusCode::OK {
            tracing::error!(
                "Failed to clear quarantine flag for {}@{}: {} {}",
                request.repository(),
                request.digest(),
                status,
                message
            );
            return Err(ClearanceError::Rejected { status, message });
        }

        tracing::info!(
            "Quarantine flag cleared for {}@{}",
            request.repository(),
            request.digest()
        );
        Ok(ReleaseOutcome { status, message })
    }
}
