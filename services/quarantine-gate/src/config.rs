//! Gate configuration, read from a TOML file.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! audit-link = "https://example.com/audit"
//!
//! [scan]
//! max-concurrent = 8
//! history = 256
//! fetch-timeout = 60
//! release-timeout = 30
//!
//! [[registry]]
//! host = "myregistry.azurecr.io"
//! auth = { basic = { username = "gate", password = "..." } }
//! ```

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use registry_client::{RegistryAuth, RegistryTransport};
use serde::Deserialize;

use crate::clearer::{DEFAULT_AUDIT_LINK, DEFAULT_RELEASE_TIMEOUT, QuarantineClearer};
use crate::orchestrator::{Registries, ScanOrchestrator};
use crate::pool::{DEFAULT_HISTORY, DEFAULT_MAX_CONCURRENT, ScanPool};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// The configuration could not be loaded or applied.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Path to the configuration file
        path: Utf8PathBuf,
        /// The IO error
        #[source]
        source: io::Error,
    },

    /// The file is not valid configuration.
    #[error("parsing {path}: {source}")]
    Parse {
        /// Path to the configuration file
        path: Utf8PathBuf,
        /// The parse error
        #[source]
        source: toml_edit::de::Error,
    },

    /// A registry entry could not be turned into a transport.
    #[error("registry {host}: {source}")]
    Registry {
        /// The configured host
        host: String,
        /// The transport error
        #[source]
        source: registry_client::Error,
    },

    /// No `[[registry]]` entries are configured, every scan would fail.
    #[error("no registries configured")]
    NoRegistries,
}

/// Top level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GateConfig {
    /// Address the webhook listens on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Link recorded in the quarantine details of released images.
    #[serde(default = "default_audit_link")]
    pub audit_link: String,

    /// Scan scheduling.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Registries the gate may scan and release images on.
    #[serde(default, rename = "registry")]
    pub registries: Vec<RegistryConfig>,
}

fn default_listen() -> SocketAddr {
    (Ipv4Addr::UNSPECIFIED, DEFAULT_PORT).into()
}

fn default_audit_link() -> String {
    DEFAULT_AUDIT_LINK.to_owned()
}

/// Scan scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScanConfig {
    /// Scans allowed to run at once.
    pub max_concurrent: usize,

    /// Completion records kept in memory.
    pub history: usize,

    /// Seconds allowed for each manifest or blob request.
    pub fetch_timeout: u64,

    /// Seconds allowed for the release call.
    pub release_timeout: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            history: DEFAULT_HISTORY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT.as_secs(),
            release_timeout: DEFAULT_RELEASE_TIMEOUT.as_secs(),
        }
    }
}

impl ScanConfig {
    /// Timeout for each registry read.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    /// Timeout for the release call.
    pub fn release_timeout(&self) -> Duration {
        Duration::from_secs(self.release_timeout)
    }
}

/// One registry and the credentials used for it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Registry host, as it appears in webhook events.
    pub host: String,

    /// Credentials, anonymous when omitted.
    #[serde(default)]
    pub auth: RegistryAuth,
}

impl GateConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, toml_edit::de::Error> {
        toml_edit::de::from_str(text)
    }

    /// Read configuration from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;

        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Build an authenticated transport for every configured registry.
    pub fn registries(&self) -> Result<Registries, ConfigError> {
        if self.registries.is_empty() {
            return Err(ConfigError::NoRegistries);
        }

        self.registries
            .iter()
            .map(|registry| {
                RegistryTransport::new(&registry.host, registry.auth.clone())
                    .map(|transport| transport.with_timeout(self.scan.fetch_timeout()))
                    .map_err(|source| ConfigError::Registry {
                        host: registry.host.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// The release step as configured.
    pub fn clearer(&self) -> QuarantineClearer {
        QuarantineClearer::new(self.audit_link.clone(), self.scan.release_timeout())
    }

    /// The scan pool as configured.
    pub fn pool(&self) -> Result<ScanPool, ConfigError> {
        let orchestrator = ScanOrchestrator::new(self.registries()?, self.clearer());
        Ok(ScanPool::new(
            orchestrator,
            self.scan.max_concurrent,
            self.scan.history,
        ))
    }
}
