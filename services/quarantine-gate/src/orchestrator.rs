//! The scan-and-release workflow.

use std::collections::HashMap;

use registry_client::{LayerDescriptor, RegistryTransport};

use crate::clearer::{QuarantineClearer, ReleaseOutcome};
use crate::error::ScanError;
use crate::request::ScanRequest;
use crate::validator::{PREFIX_BYTES, decode_prefix, validate};

/// Authenticated transports for the registries the gate may scan, keyed by host.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    transports: HashMap<String, RegistryTransport>,
}

impl Registries {
    /// An empty set of registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transport, replacing any previous transport for the same host.
    pub fn insert(&mut self, transport: RegistryTransport) {
        let host = transport.host().as_str().to_ascii_lowercase();
        self.transports.insert(host, transport);
    }

    /// The transport for `host`, matched case-insensitively.
    pub fn get(&self, host: &str) -> Option<&RegistryTransport> {
        self.transports.get(&host.to_ascii_lowercase())
    }

    /// Number of configured registries.
    pub fn len(&self) -> usize {
        self.transports.len()
    }

    /// True when no registry is configured.
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl FromIterator<RegistryTransport> for Registries {
    fn from_iter<I: IntoIterator<Item = RegistryTransport>>(iter: I) -> Self {
        let mut registries = Registries::new();
        for transport in iter {
            registries.insert(transport);
        }
        registries
    }
}

/// How a completed scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every layer passed and the image was released.
    Released(ReleaseOutcome),

    /// A layer failed the content policy, the image stays quarantined.
    Rejected {
        /// Position of the layer in the manifest.
        index: usize,
        /// The failing layer.
        layer: LayerDescriptor,
    },
}

/// Scans quarantined images and releases the ones whose layers all conform.
#[derive(Debug, Clone)]
pub struct ScanOrchestrator {
    registries: Registries,
    clearer: QuarantineClearer,
}

impl ScanOrchestrator {
    /// Create an orchestrator for the given registries.
    pub fn new(registries: Registries, clearer: QuarantineClearer) -> Self {
        Self {
            registries,
            clearer,
        }
    }

    /// Scan one image.
    ///
    /// Layers are validated in manifest order and the scan stops at the first
    /// failing layer, later layers are never fetched. The release call is made
    /// at most once, and only when every layer passed (trivially so for an
    /// image without layers). Any error leaves the image quarantined.
    #[tracing::instrument(level = "debug", skip_all, fields(image = %request))]
    pub async fn run(&self, request: &ScanRequest) -> Result<ScanOutcome, ScanError> {
        let transport = self
            .registries
            .get(request.registry_host())
            .ok_or_else(|| ScanError::UnknownRegistry(request.registry_host().to_owned()))?;
        let client = transport.repository(request.repository());

        let manifest = client
            .manifest(request.digest())
            .await
            .map_err(ScanError::Manifest)?;
        tracing::debug!(layers = manifest.layers.len(), "fetched manifest");

        for (index, layer) in manifest.layers.into_iter().enumerate() {
            let prefix = client
                .blob_prefix(&layer.digest, PREFIX_BYTES)
                .await
                .map_err(|source| ScanError::Blob {
                    digest: layer.digest.clone(),
                    source,
                })?;

            let content =
                decode_prefix(&prefix, PREFIX_BYTES).map_err(|source| ScanError::ValidatorInput {
                    digest: layer.digest.clone(),
                    source,
                })?;

            if !validate(content).is_pass() {
                tracing::info!("Stop scanning image, found non-Bicep file: {layer}");
                return Ok(ScanOutcome::Rejected { index, layer });
            }
            tracing::trace!(index, digest = %layer.digest, "layer passed");
        }

        let outcome = self.clearer.clear(transport, request).await?;
        Ok(ScanOutcome::Released(outcome))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use http::StatusCode;
    use registry_client::RegistryAuth;
    use registry_client::mock::MockService;

    use super::*;
    use crate::error::ClearanceError;

    pub(crate) const HOST: &str = "registry.test";
    pub(crate) const REPOSITORY: &str = "modules/app";
    pub(crate) const DIGEST: &str = "sha256:manifest";
    pub(crate) const MANIFEST_PATH: &str = "/v2/modules/app/manifests/sha256:manifest";
    pub(crate) const RELEASE_PATH: &str = "/acr/v1/modules/app/_manifests/sha256:manifest";

    pub(crate) fn blob_path(digest: &str) -> String {
        format!("/v2/{REPOSITORY}/blobs/{digest}")
    }

    /// Serve a manifest listing `layers`, each blob holding its content.
    pub(crate) fn serve_image(mock: &MockService, layers: &[(&str, &str)]) {
        let descriptors: Vec<_> = layers
            .iter()
            .map(|(digest, content)| {
                serde_json::json!({
                    "mediaType": "application/vnd.ms.bicep.module.layer.v1+json",
                    "digest": digest,
                    "size": content.len(),
                })
            })
            .collect();
        let manifest = serde_json::json!({ "schemaVersion": 2, "layers": descriptors });
        mock.ok(MANIFEST_PATH, manifest.to_string());

        for (digest, content) in layers {
            mock.ok(&blob_path(digest), content.to_string());
        }
    }

    pub(crate) fn orchestrator(mock: &MockService) -> ScanOrchestrator {
        let transport =
            RegistryTransport::new_with_inner_service(HOST, RegistryAuth::Anonymous, mock.clone())
                .unwrap();
        ScanOrchestrator::new(
            Registries::from_iter([transport]),
            QuarantineClearer::default(),
        )
    }

    pub(crate) fn request() -> ScanRequest {
        ScanRequest::new(HOST, REPOSITORY, DIGEST).unwrap()
    }

    const BICEP: &str = "resource sa 'Microsoft.Storage/storageAccounts@2023-01-01' = {}";
    const NOT_BICEP: &str = "#!/bin/sh\necho hello";

    #[tokio::test]
    async fn stops_at_first_failing_layer() {
        let mock = MockService::new();
        serve_image(
            &mock,
            &[
                ("sha256:l1", BICEP),
                ("sha256:l2", "param a int\nvar b = a"),
                ("sha256:l3", NOT_BICEP),
                ("sha256:l4", BICEP),
            ],
        );
        mock.ok(RELEASE_PATH, "");

        let outcome = orchestrator(&mock).run(&request()).await.unwrap();
        match outcome {
            ScanOutcome::Rejected { index, layer } => {
                assert_eq!(index, 2);
                assert_eq!(layer.digest, "sha256:l3");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert_eq!(
            mock.paths(),
            [
                MANIFEST_PATH.to_owned(),
                blob_path("sha256:l1"),
                blob_path("sha256:l2"),
                blob_path("sha256:l3"),
            ]
        );
    }

    #[tokio::test]
    async fn releases_when_all_layers_pass() {
        let mock = MockService::new();
        serve_image(
            &mock,
            &[("sha256:l1", BICEP), ("sha256:l2", "var a = 1\nvar b = 2")],
        );
        mock.ok(RELEASE_PATH, "");

        let outcome = orchestrator(&mock).run(&request()).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Released(ref r) if r.status == StatusCode::OK));

        let releases: Vec<_> = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == http::Method::PATCH)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].uri.path(), RELEASE_PATH);
        assert!(
            std::str::from_utf8(&releases[0].body)
                .unwrap()
                .contains(r#""quarantineState":"Passed""#)
        );
    }

    #[tokio::test]
    async fn image_without_layers_is_released() {
        let mock = MockService::new();
        serve_image(&mock, &[]);
        mock.ok(RELEASE_PATH, "");

        let outcome = orchestrator(&mock).run(&request()).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Released(_)));
        assert_eq!(mock.paths(), [MANIFEST_PATH, RELEASE_PATH]);
    }

    #[tokio::test]
    async fn missing_manifest_aborts() {
        let mock = MockService::new();
        mock.ok(RELEASE_PATH, "");

        let err = orchestrator(&mock).run(&request()).await.unwrap_err();
        assert!(matches!(err, ScanError::Manifest(_)));
        assert_eq!(mock.paths(), [MANIFEST_PATH]);
    }

    #[tokio::test]
    async fn blob_failure_aborts_without_release() {
        let mock = MockService::new();
        serve_image(&mock, &[("sha256:l1", BICEP), ("sha256:l2", BICEP)]);
        mock.add(
            &blob_path("sha256:l2"),
            StatusCode::INTERNAL_SERVER_ERROR,
            http::HeaderMap::new(),
            "boom",
        );
        mock.ok(RELEASE_PATH, "");

        let err = orchestrator(&mock).run(&request()).await.unwrap_err();
        match err {
            ScanError::Blob { digest, .. } => assert_eq!(digest, "sha256:l2"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!mock.paths().contains(&RELEASE_PATH.to_owned()));
    }

    #[tokio::test]
    async fn binary_layer_aborts_without_release() {
        let mock = MockService::new();
        serve_image(&mock, &[("sha256:l1", BICEP)]);
        mock.ok(&blob_path("sha256:l1"), vec![0x1f, 0x8b, 0xff, 0x00]);
        mock.ok(RELEASE_PATH, "");

        let err = orchestrator(&mock).run(&request()).await.unwrap_err();
        assert!(matches!(err, ScanError::ValidatorInput { .. }));
        assert!(!mock.paths().contains(&RELEASE_PATH.to_owned()));
    }

    #[tokio::test]
    async fn unknown_registry_sends_nothing() {
        let mock = MockService::new();
        let request = ScanRequest::new("elsewhere.test", REPOSITORY, DIGEST).unwrap();

        let err = orchestrator(&mock).run(&request).await.unwrap_err();
        assert!(matches!(err, ScanError::UnknownRegistry(ref host) if host == "elsewhere.test"));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn registry_host_matches_case_insensitively() {
        let mock = MockService::new();
        serve_image(&mock, &[]);
        mock.ok(RELEASE_PATH, "");

        let request = ScanRequest::new("Registry.Test", REPOSITORY, DIGEST).unwrap();
        let outcome = orchestrator(&mock).run(&request).await.unwrap();
        assert!(matches!(outcome, ScanOutcome::Released(_)));
    }

    #[tokio::test]
    async fn release_failure_is_reported() {
        let mock = MockService::new();
        serve_image(&mock, &[("sha256:l1", BICEP)]);
        mock.add(
            RELEASE_PATH,
            StatusCode::UNAUTHORIZED,
            http::HeaderMap::new(),
            "",
        );

        let err = orchestrator(&mock).run(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::Clearance(ClearanceError::Rejected {
                status: StatusCode::UNAUTHORIZED,
                ..
            })
        ));
        let patches = mock
            .requests()
            .iter()
            .filter(|r| r.method == http::Method::PATCH)
            .count();
        assert_eq!(patches, 1);
    }
}
