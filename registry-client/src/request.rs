use std::time::Duration;

use http::{header::HeaderValue, HeaderName, Uri};

use crate::error::Error;
use crate::{response::Response, RegistryTransport};

/// Builder for a single request sent through a [`RegistryTransport`].
#[derive(Debug)]
pub struct RequestBuilder {
    req: http::request::Builder,
    transport: RegistryTransport,
    body: Option<hyperdriver::Body>,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    /// Start a request with the given method and URI.
    pub fn new(transport: RegistryTransport, uri: Uri, method: http::Method) -> Self {
        let timeout = transport.timeout();
        Self {
            req: http::Request::builder().method(method).uri(uri),
            transport,
            body: None,
            timeout,
        }
    }

    /// Add a header to the request.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.req = self.req.header(key, value);
        self
    }

    /// Override the transport's default timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the request body.
    pub fn body<B: Into<hyperdriver::Body>>(self, body: B) -> Self {
        Self {
            body: Some(body.into()),
            ..self
        }
    }

    /// Send the request, waiting at most for the configured timeout.
    pub async fn send(self) -> Result<Response, Error> {
        let req = self
            .req
            .body(self.body.unwrap_or_else(hyperdriver::Body::empty))?;
        let uri = req.uri().clone();

        if let Some(timeout) = self.timeout {
            match tokio::time::timeout(timeout, self.transport.execute(req)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(uri)),
            }
        } else {
            self.transport.execute(req).await
        }
    }
}
