//! Response wrapper with helpers for reading registry bodies.

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt as _;
use hyperdriver::Body;

use crate::error::{BoxError, HttpResponseError};

/// Wrapper around an HTTP response that keeps the parts of the request that produced it.
#[derive(Debug)]
pub struct Response {
    request: http::request::Parts,
    response: http::response::Parts,
    body: Body,
}

impl Response {
    /// Create a new `Response` instance.
    pub fn new(request: http::request::Parts, response: http::Response<Body>) -> Self {
        let (response, body) = response.into_parts();

        Self {
            request,
            response,
            body,
        }
    }

    /// Get the status code of the response.
    pub fn status(&self) -> http::StatusCode {
        self.response.status
    }

    /// Get the headers of the response.
    pub fn headers(&self) -> &http::HeaderMap {
        &self.response.headers
    }

    /// Get the URI of the request that generated the response.
    pub fn uri(&self) -> &http::Uri {
        &self.request.uri
    }

    /// Get the method of the request that generated the response.
    pub fn method(&self) -> &http::Method {
        &self.request.method
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes, BoxError> {
        let collected = self.body.collect().await.map_err(Into::<BoxError>::into)?;
        Ok(collected.to_bytes())
    }

    /// Collect the whole body as UTF-8 text.
    pub async fn text(self) -> Result<String, BoxError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(Into::into)
    }

    /// Read at most `limit` bytes from the start of the body.
    ///
    /// Frames are pulled only until `limit` bytes have arrived, the remainder
    /// of the body is dropped unread.
    pub async fn prefix(self, limit: usize) -> Result<Bytes, BoxError> {
        let mut body = std::pin::pin!(self.body);
        let mut buf = BytesMut::new();

        while buf.len() < limit {
            let Some(frame) = body.as_mut().frame().await else {
                break;
            };

            if let Ok(data) = frame.map_err(Into::<BoxError>::into)?.into_data() {
                buf.extend_from_slice(&data);
            }
        }

        buf.truncate(limit);
        Ok(buf.freeze())
    }

    /// Convert the `Response` into an `HttpResponseError` instance.
    pub async fn into_error(self) -> HttpResponseError {
        HttpResponseError::from_response(self).await
    }

    /// Convert the `Response` into an `HttpResponseError` unless it has a success status.
    pub async fn error_for_status(self) -> Result<Self, HttpResponseError> {
        if self.status().is_success() {
            Ok(self)
        } else {
            Err(self.into_error().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: &'static [u8]) -> Response {
        let (parts, _) = http::Request::builder()
            .uri("https://registry.test/v2/")
            .body(())
            .unwrap()
            .into_parts();
        let response = http::Response::new(Body::from(Bytes::from_static(body)));
        Response::new(parts, response)
    }

    #[tokio::test]
    async fn prefix_truncates() {
        let prefix = response(b"0123456789").prefix(4).await.unwrap();
        assert_eq!(&prefix[..], b"0123");
    }

    #[tokio::test]
    async fn prefix_of_short_body() {
        let prefix = response(b"abc").prefix(4096).await.unwrap();
        assert_eq!(&prefix[..], b"abc");

        let prefix = response(b"").prefix(4096).await.unwrap();
        assert!(prefix.is_empty());
    }

    #[tokio::test]
    async fn text_body() {
        assert_eq!(response(b"hello").text().await.unwrap(), "hello");
    }
}
