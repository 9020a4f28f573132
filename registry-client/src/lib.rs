//! An authenticated client for OCI registries.
//!
//! [`RegistryTransport`] is an HTTP client bound to a single registry host which
//! attaches that registry's credentials to every request addressed to it.
//! [`RegistryClient`] scopes a transport to one repository and reads manifests
//! and blobs from it.
#![allow(clippy::arc_with_non_send_sync)]

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use http::uri::Authority;
use http::{Method, Uri};
use hyperdriver::service::SharedService;
use tower::ServiceExt;

mod authentication;
mod client;
pub mod error;
pub mod manifest;
pub mod request;
pub mod response;
mod secret;
pub mod uri;

pub use self::authentication::{
    basic_auth, AuthenticationLayer, AuthenticationService, RegistryAuth,
};
pub use self::client::RegistryClient;
pub use self::error::{BoxError, Error, HttpResponseError};
pub use self::manifest::{ImageManifest, LayerDescriptor};
pub use self::request::RequestBuilder;
pub use self::response::Response;
pub use self::secret::Secret;

/// An authenticated HTTP transport for one registry host.
///
/// Cloning is cheap, clones share the connection pool and the credentials.
#[derive(Debug, Clone)]
pub struct RegistryTransport {
    host: Authority,
    inner: hyperdriver::client::SharedClientService<hyperdriver::Body, hyperdriver::Body>,
    authentication: Arc<ArcSwap<RegistryAuth>>,
    timeout: Option<Duration>,
}

impl RegistryTransport {
    /// Create a transport for `host` using the given credentials.
    pub fn new(host: &str, authentication: RegistryAuth) -> Result<Self, Error> {
        let host = parse_host(host)?;
        let authentication = Arc::new(ArcSwap::new(Arc::new(authentication)));
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .layer(AuthenticationLayer::new(host.clone(), authentication.clone()))
            .build_service();

        Ok(RegistryTransport {
            host,
            inner,
            authentication,
            timeout: None,
        })
    }

    /// Create a transport sending requests through a custom inner service.
    ///
    /// Credentials are still attached by this transport.
    pub fn new_with_inner_service<S>(
        host: &str,
        authentication: RegistryAuth,
        inner: S,
    ) -> Result<Self, Error>
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let host = parse_host(host)?;
        let authentication = Arc::new(ArcSwap::new(Arc::new(authentication)));

        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .layer(AuthenticationLayer::new(host.clone(), authentication.clone()))
            .service(inner);

        Ok(RegistryTransport {
            host,
            inner: service,
            authentication,
            timeout: None,
        })
    }

    /// Set the default timeout applied to every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The registry host this transport authenticates against.
    pub fn host(&self) -> &Authority {
        &self.host
    }

    /// The default request timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Replace the credentials used by this transport and all of its clones.
    pub fn refresh_auth(&self, authentication: RegistryAuth) {
        self.authentication.store(Arc::new(authentication));
    }

    /// Scope this transport to a repository.
    pub fn repository(&self, name: impl Into<String>) -> RegistryClient {
        RegistryClient::new(self.clone(), name)
    }

    /// Start a request for an absolute path on the registry host.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, Error> {
        let uri = uri::registry_uri(&self.host, path)?;
        Ok(RequestBuilder::new(self.clone(), uri, method))
    }

    /// Start a request for an arbitrary URI, such as a redirect target.
    pub fn request_uri(&self, method: Method, uri: Uri) -> RequestBuilder {
        RequestBuilder::new(self.clone(), uri, method)
    }

    /// Start a `GET` request on the registry host.
    pub fn get(&self, path: &str) -> Result<RequestBuilder, Error> {
        self.request(Method::GET, path)
    }

    /// Start a `PATCH` request on the registry host.
    pub fn patch(&self, path: &str) -> Result<RequestBuilder, Error> {
        self.request(Method::PATCH, path)
    }

    /// Send a request without a timeout.
    pub async fn execute(&self, req: http::Request<hyperdriver::Body>) -> Result<Response, Error> {
        let parts = request_parts(&req);
        tracing::trace!("{} {}", parts.method, parts.uri);

        let response = self
            .inner
            .clone()
            .oneshot(req)
            .await
            .map_err(|source| Error::Request {
                uri: parts.uri.clone(),
                source,
            })?;
        Ok(Response::new(parts, response))
    }
}

fn parse_host(host: &str) -> Result<Authority, Error> {
    host.parse().map_err(|source| Error::InvalidHost {
        host: host.to_owned(),
        source,
    })
}

fn request_parts<B>(req: &http::Request<B>) -> http::request::Parts {
    let (mut parts, _) = http::Request::new(()).into_parts();
    parts.method = req.method().clone();
    parts.uri = req.uri().clone();
    parts.headers = req.headers().clone();
    parts
}

/// An in-process registry for tests.
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;
    use futures::future::BoxFuture;
    use http::response;
    use http_body_util::BodyExt as _;
    use parking_lot::Mutex;

    /// A canned response.
    #[derive(Debug, Clone)]
    pub struct MockResponse {
        status: http::StatusCode,
        headers: http::HeaderMap,
        body: Bytes,
    }

    impl MockResponse {
        /// Create a canned response.
        pub fn new(status: http::StatusCode, headers: http::HeaderMap, body: impl Into<Bytes>) -> Self {
            Self {
                status,
                headers,
                body: body.into(),
            }
        }
    }

    /// A request received by the mock, with its body collected.
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        /// The request method
        pub method: http::Method,
        /// The request URI
        pub uri: http::Uri,
        /// The request headers
        pub headers: http::HeaderMap,
        /// The request body
        pub body: Bytes,
    }

    /// A tower service answering from canned responses keyed by path.
    ///
    /// Paths without a canned response are answered with `404 Not Found`.
    /// Every request is recorded, clones share both responses and records.
    #[derive(Debug, Default, Clone)]
    pub struct MockService {
        responses: Arc<Mutex<HashMap<String, MockResponse>>>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl MockService {
        /// Create an empty mock.
        pub fn new() -> Self {
            Self::default()
        }

        /// Serve `body` with `status` and `headers` for `path`.
        pub fn add(
            &self,
            path: &str,
            status: http::StatusCode,
            headers: http::HeaderMap,
            body: impl Into<Bytes>,
        ) {
            let response = MockResponse::new(status, headers, body);
            self.responses.lock().insert(path.to_owned(), response);
        }

        /// Serve `body` with `200 OK` for `path`.
        pub fn ok(&self, path: &str, body: impl Into<Bytes>) {
            self.add(path, http::StatusCode::OK, http::HeaderMap::new(), body);
        }

        /// All requests received so far, oldest first.
        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }

        /// The paths of all requests received so far, oldest first.
        pub fn paths(&self) -> Vec<String> {
            self.requests
                .lock()
                .iter()
                .map(|r| r.uri.path().to_owned())
                .collect()
        }
    }

    impl tower::Service<http::Request<hyperdriver::Body>> for MockService {
        type Response = http::Response<hyperdriver::Body>;
        type Error = hyperdriver::client::Error;
        type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<hyperdriver::Body>) -> Self::Future {
            let response = self.responses.lock().get(req.uri().path()).cloned();
            let requests = self.requests.clone();

            Box::pin(async move {
                let (parts, body) = req.into_parts();
                let body = body
                    .collect()
                    .await
                    .map(|collected| collected.to_bytes())
                    .unwrap_or_default();

                requests.lock().push(RecordedRequest {
                    method: parts.method,
                    uri: parts.uri,
                    headers: parts.headers,
                    body,
                });

                let response = response.unwrap_or_else(|| {
                    MockResponse::new(
                        http::StatusCode::NOT_FOUND,
                        http::HeaderMap::new(),
                        Bytes::new(),
                    )
                });

                let mut builder = response::Builder::new()
                    .status(response.status)
                    .version(http::Version::HTTP_11);

                for (key, value) in response.headers.iter() {
                    builder = builder.header(key, value);
                }

                let response = builder
                    .body(hyperdriver::Body::from(response.body))
                    .expect("canned response is valid");

                Ok(response)
            })
        }
    }
}
