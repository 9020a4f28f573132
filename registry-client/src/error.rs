//! Error types for registry requests
use std::fmt;

use http::{StatusCode, Uri};
use thiserror::Error;

use crate::response::Response;

/// A boxed error from a response body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error occured while talking to a registry.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be sent, or no response was received.
    #[error("sending request to {uri}: {source}")]
    Request {
        /// The request URI
        uri: Uri,
        /// The transport error
        #[source]
        source: hyperdriver::client::Error,
    },

    /// No response arrived within the configured timeout.
    #[error("request to {0} timed out")]
    Timeout(Uri),

    /// The registry answered with an unexpected status.
    #[error(transparent)]
    Response(#[from] HttpResponseError),

    /// An error occured while recieving the response body
    #[error("reading response body: {0}")]
    ResponseBody(#[source] BoxError),

    /// The manifest could not be parsed.
    #[error("malformed manifest {digest}: {source}")]
    Manifest {
        /// The manifest digest
        digest: String,
        /// The parse error
        #[source]
        source: serde_json::Error,
    },

    /// A blob download kept redirecting.
    #[error("too many redirects fetching {0}")]
    TooManyRedirects(String),

    /// The registry host is not a valid URI authority.
    #[error("invalid registry host {host:?}: {source}")]
    InvalidHost {
        /// The rejected host
        host: String,
        /// The parse error
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The request could not be built, usually from an invalid host or path.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),
}

/// A registry returned an error response
#[derive(Debug, Clone)]
pub struct HttpResponseError {
    /// The HTTP status code of the response
    pub status: StatusCode,

    /// The message body of the response
    pub message: String,
}

impl HttpResponseError {
    /// Create a new HTTP response error from a response.
    ///
    /// Only the first [`MESSAGE_LIMIT`](Self::MESSAGE_LIMIT) bytes of the body are read.
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let message = match response.prefix(Self::MESSAGE_LIMIT).await {
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(err) => format!("Failed to read response body: {}", err),
        };

        Self { status, message }
    }

    /// Maximum number of body bytes kept as the message.
    pub const MESSAGE_LIMIT: usize = 1024;
}

impl fmt::Display for HttpResponseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HTTP {} response: {}", self.status, self.message)
    }
}

impl std::error::Error for HttpResponseError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: StatusCode, body: Vec<u8>) -> Response {
        let (parts, _) = http::Request::builder()
            .uri("https://registry.test/v2/")
            .body(())
            .unwrap()
            .into_parts();
        let mut response = http::Response::new(hyperdriver::Body::from(body));
        *response.status_mut() = status;
        Response::new(parts, response)
    }

    #[tokio::test]
    async fn error_message_is_bounded() {
        let body = vec![b'x'; 10 * HttpResponseError::MESSAGE_LIMIT];
        let err = HttpResponseError::from_response(response(StatusCode::BAD_GATEWAY, body)).await;

        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.message.len(), HttpResponseError::MESSAGE_LIMIT);
    }

    #[tokio::test]
    async fn error_message_keeps_short_bodies() {
        let body = br#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#.to_vec();
        let err = HttpResponseError::from_response(response(StatusCode::NOT_FOUND, body)).await;
        assert_eq!(err.message, r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#);
    }
}
