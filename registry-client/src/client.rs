use std::future::Future;

use bytes::Bytes;
use http::{header, Method};

use crate::error::Error;
use crate::manifest::{ImageManifest, DOCKER_MANIFEST, OCI_MANIFEST};
use crate::uri::{endpoint, registry_uri, resolve_location};
use crate::RegistryTransport;

const MAX_REDIRECTS: usize = 5;

/// A client for a single repository on a registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    transport: RegistryTransport,
    repository: String,
}

impl RegistryClient {
    /// Scope `transport` to `repository`.
    pub fn new(transport: RegistryTransport, repository: impl Into<String>) -> Self {
        Self {
            transport,
            repository: repository.into(),
        }
    }

    /// The repository name.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The underlying authenticated transport.
    pub fn transport(&self) -> &RegistryTransport {
        &self.transport
    }

    /// Run a whole read, body included, within the transport timeout.
    async fn bounded<T, F>(&self, path: &str, read: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let Some(timeout) = self.transport.timeout() else {
            return read.await;
        };

        match tokio::time::timeout(timeout, read).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(registry_uri(self.transport.host(), path)?)),
        }
    }

    /// Fetch and parse the image manifest stored under `digest`.
    ///
    /// The transport timeout covers the whole fetch, including the body.
    #[tracing::instrument(level = "debug", skip(self), fields(repository = %self.repository))]
    pub async fn manifest(&self, digest: &str) -> Result<ImageManifest, Error> {
        let path = endpoint(["v2", &self.repository, "manifests", digest]);
        self.bounded(&path, self.fetch_manifest(&path, digest)).await
    }

    async fn fetch_manifest(&self, path: &str, digest: &str) -> Result<ImageManifest, Error> {
        let response = self
            .transport
            .get(path)?
            .header(header::ACCEPT, format!("{OCI_MANIFEST}, {DOCKER_MANIFEST}"))
            .send()
            .await?
            .error_for_status()
            .await?;

        let body = response.bytes().await.map_err(Error::ResponseBody)?;
        ImageManifest::from_slice(&body).map_err(|source| Error::Manifest {
            digest: digest.to_owned(),
            source,
        })
    }

    /// Fetch at most `limit` bytes from the start of the blob stored under `digest`.
    ///
    /// Registries commonly redirect blob downloads to a storage backend, those
    /// redirects are followed. The rest of the blob is never downloaded. The
    /// transport timeout covers the redirects and the body read together.
    #[tracing::instrument(level = "debug", skip(self), fields(repository = %self.repository))]
    pub async fn blob_prefix(&self, digest: &str, limit: usize) -> Result<Bytes, Error> {
        let path = endpoint(["v2", &self.repository, "blobs", digest]);
        self.bounded(&path, self.fetch_blob_prefix(&path, digest, limit))
            .await
    }

    async fn fetch_blob_prefix(&self, path: &str, digest: &str, limit: usize) -> Result<Bytes, Error> {
        let mut response = self.transport.get(path)?.send().await?;

        let mut redirects = 0;
        while response.status().is_redirection() {
            let Some(next) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|location| resolve_location(response.uri(), location))
            else {
                break;
            };

            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(Error::TooManyRedirects(digest.to_owned()));
            }

            tracing::trace!(host = ?next.host(), "following blob redirect");
            response = self.transport.request_uri(Method::GET, next).send().await?;
        }

        let response = response.error_for_status().await?;
        response.prefix(limit).await.map_err(Error::ResponseBody)
    }
}
