//! Authentication for registry requests.
//!
//! A [`RegistryAuth`] is attached by the [`AuthenticationLayer`] to every request
//! addressed to the registry host. Requests to any other host (for example a
//! storage backend a blob download redirects to) are sent without credentials.

use std::sync::Arc;

use arc_swap::ArcSwap;
use http::uri::Authority;
use http::HeaderValue;
use serde::Deserialize;
use tower::layer::Layer;

use crate::secret::Secret;

/// Create a basic authentication header value.
///
/// Basic authentication Base64 encodes the username and password, separated by a colon.
///
/// # Example
/// ```rust
/// use registry_client::basic_auth;
///
/// let header = basic_auth("username", "password");
/// assert_eq!(header.to_str().unwrap(), "Basic dXNlcm5hbWU6cGFzc3dvcmQ=");
/// ```
pub fn basic_auth<U, P>(username: U, password: P) -> HeaderValue
where
    U: std::fmt::Display,
    P: std::fmt::Display,
{
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:{}", username, password);
    }
    let mut header = HeaderValue::from_bytes(&buf).expect("base64 is always valid HeaderValue");
    header.set_sensitive(true);
    header
}

/// Credentials presented to a registry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryAuth {
    /// No credentials.
    #[default]
    Anonymous,

    /// Username and password (or repository-scoped token) credentials.
    Basic {
        /// The username, or the token name.
        username: String,
        /// The password, or the token value.
        password: Secret,
    },

    /// A pre-acquired access token.
    Bearer {
        /// The access token.
        token: Secret,
    },
}

impl RegistryAuth {
    /// The `Authorization` header for these credentials, if any.
    pub fn header_value(&self) -> Option<HeaderValue> {
        match self {
            RegistryAuth::Anonymous => None,
            RegistryAuth::Basic { username, password } => {
                Some(basic_auth(username, password.revealed()))
            }
            RegistryAuth::Bearer { token } => token.bearer().ok(),
        }
    }

    /// Attach credentials to a request that does not already carry them.
    pub fn authenticate<B>(&self, mut req: http::Request<B>) -> http::Request<B> {
        let Some(value) = self.header_value() else {
            return req;
        };

        if !req.headers().contains_key(http::header::AUTHORIZATION) {
            req.headers_mut()
                .append(http::header::AUTHORIZATION, value);
        } else {
            tracing::warn!("{} header already set", http::header::AUTHORIZATION);
        }
        req
    }
}

/// A layer to provide swappable credentials scoped to one registry host.
#[derive(Debug)]
pub struct AuthenticationLayer {
    host: Authority,
    auth: Arc<ArcSwap<RegistryAuth>>,
}

impl Clone for AuthenticationLayer {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl AuthenticationLayer {
    pub(crate) fn new(host: Authority, auth: Arc<ArcSwap<RegistryAuth>>) -> Self {
        Self { host, auth }
    }
}

impl<S> Layer<S> for AuthenticationLayer {
    type Service = AuthenticationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticationService {
            inner,
            host: self.host.clone(),
            auth: self.auth.clone(),
        }
    }
}

/// A service attaching registry credentials to requests for the registry host.
#[derive(Debug)]
pub struct AuthenticationService<S> {
    inner: S,
    host: Authority,
    auth: Arc<ArcSwap<RegistryAuth>>,
}

impl<S: Clone> Clone for AuthenticationService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            host: self.host.clone(),
            auth: self.auth.clone(),
        }
    }
}

impl<S, BIn, BOut> tower::Service<http::Request<BIn>> for AuthenticationService<S>
where
    S: tower::Service<http::Request<BIn>, Response = http::Response<BOut>>,
    S::Future: Send + 'static,
{
    type Response = http::Response<BOut>;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<BIn>) -> Self::Future {
        let req = if req.uri().authority() == Some(&self.host) {
            self.auth.load().authenticate(req)
        } else {
            tracing::trace!("not sending registry credentials to {}", req.uri());
            req
        };
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_adds_nothing() {
        let req = http::Request::builder()
            .uri("https://registry.test/v2/")
            .body(())
            .unwrap();

        let req = RegistryAuth::Anonymous.authenticate(req);
        assert!(!req.headers().contains_key(http::header::AUTHORIZATION));
    }

    #[test]
    fn bearer_header() {
        let auth = RegistryAuth::Bearer {
            token: Secret::from("abc"),
        };
        let header = auth.header_value().unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer abc");
        assert!(header.is_sensitive());
    }

    #[test]
    fn existing_header_is_kept() {
        let req = http::Request::builder()
            .uri("https://registry.test/v2/")
            .header(http::header::AUTHORIZATION, "Bearer other")
            .body(())
            .unwrap();

        let auth = RegistryAuth::Basic {
            username: "user".into(),
            password: Secret::from("pass"),
        };
        let req = auth.authenticate(req);
        assert_eq!(
            req.headers().get_all(http::header::AUTHORIZATION).iter().count(),
            1
        );
        assert_eq!(req.headers()[http::header::AUTHORIZATION], "Bearer other");
    }
}
