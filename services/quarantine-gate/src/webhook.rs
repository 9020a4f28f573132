//! HTTP entry point for registry webhook events.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;

use crate::pool::{ScanPool, ScanRecord};
use crate::request::ScanRequest;

const QUARANTINE_ACTION: &str = "quarantine";

/// A registry webhook event.
///
/// Only the fields that decide the reply are typed, anything else in the
/// payload is ignored whatever its shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEvent {
    /// Event id, only logged
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    /// Event action, e.g. `push` or `quarantine`
    #[serde(default)]
    pub action: Option<String>,
    /// The manifest the event is about
    #[serde(default)]
    pub target: Option<EventTarget>,
    /// The request that triggered the event
    #[serde(default)]
    pub request: Option<EventRequest>,
}

/// The manifest an event is about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTarget {
    /// Manifest digest
    #[serde(default)]
    pub digest: Option<String>,
    /// Repository name
    #[serde(default)]
    pub repository: Option<String>,
}

/// The request that triggered an event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRequest {
    /// Registry host
    #[serde(default)]
    pub host: Option<String>,
}

/// Every answer the webhook gives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookReply {
    /// A scan was scheduled.
    Enqueued {
        /// Repository of the scanned image
        repository: String,
        /// Digest of the scanned image
        digest: String,
    },
    /// The event is not a quarantine event.
    Skipped,
    /// The event has no action.
    MissingAction,
    /// The quarantine event does not name an image.
    MissingImage,
}

impl WebhookReply {
    /// HTTP status for the reply.
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookReply::Enqueued { .. } | WebhookReply::Skipped => StatusCode::OK,
            WebhookReply::MissingAction | WebhookReply::MissingImage => StatusCode::BAD_REQUEST,
        }
    }

    /// Text body for the reply.
    pub fn message(&self) -> String {
        match self {
            WebhookReply::Enqueued { repository, digest } => {
                format!("Enqueued scan task for {repository}@{digest}")
            }
            WebhookReply::Skipped => "Not quarantine event, skipped.".to_owned(),
            WebhookReply::MissingAction => "Missing action in payload".to_owned(),
            WebhookReply::MissingImage => "Missing digest/repository/host in payload.".to_owned(),
        }
    }
}

impl IntoResponse for WebhookReply {
    fn into_response(self) -> Response {
        (self.status(), self.message()).into_response()
    }
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

impl WebhookEvent {
    /// The image to scan, or the reply explaining why there is none.
    pub fn scan_request(&self) -> Result<ScanRequest, WebhookReply> {
        let action = present(&self.action).ok_or(WebhookReply::MissingAction)?;
        if action != QUARANTINE_ACTION {
            return Err(WebhookReply::Skipped);
        }

        let target = self.target.as_ref();
        let digest = target.and_then(|t| present(&t.digest));
        let repository = target.and_then(|t| present(&t.repository));
        let host = self.request.as_ref().and_then(|r| present(&r.host));

        match (host, repository, digest) {
            (Some(host), Some(repository), Some(digest)) => {
                ScanRequest::new(host, repository, digest).map_err(|_| WebhookReply::MissingImage)
            }
            _ => Err(WebhookReply::MissingImage),
        }
    }
}

/// Router serving the webhook and the scan history.
pub fn router(pool: ScanPool) -> Router {
    Router::new()
        .route("/api/webhook", post(receive))
        .route("/api/scans", get(list_scans))
        .with_state(pool)
}

/// Accept an event and schedule a scan without waiting for it.
async fn receive(State(pool): State<ScanPool>, body: Bytes) -> WebhookReply {
    let event: WebhookEvent = serde_json::from_slice(&body).unwrap_or_else(|err| {
        tracing::debug!("Unreadable webhook payload: {err}");
        WebhookEvent::default()
    });

    let request = match event.scan_request() {
        Ok(request) => request,
        Err(reply) => {
            tracing::debug!(event = ?event.id, action = ?event.action, "{}", reply.message());
            return reply;
        }
    };

    let reply = WebhookReply::Enqueued {
        repository: request.repository().to_owned(),
        digest: request.digest().to_owned(),
    };

    let handle = pool.submit(request);
    tracing::info!(event = ?event.id, scan = %handle.id(), "{}", reply.message());
    reply
}

/// Recent scan completion records, oldest first.
async fn list_scans(State(pool): State<ScanPool>) -> Json<Vec<ScanRecord>> {
    Json(pool.records())
}
