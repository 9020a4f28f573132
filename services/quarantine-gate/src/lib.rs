//! # Quarantine Gate
//!
//! Releases quarantined images from a container registry once every layer
//! has been checked and looks like Bicep source.
//!
//! The registry announces a quarantined push with a webhook event. The gate
//! answers the webhook right away and scans in the background: it fetches
//! the image manifest, reads the start of each layer blob and runs the
//! content check on it. The first failing layer stops the scan and the image
//! stays quarantined. When every layer passes, the gate marks the image as
//! passed with a single release call.
//!
//! ## Example
//!
//! ```no_run
//! use camino::Utf8Path;
//! use quarantine_gate::{GateConfig, webhook};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GateConfig::load(Utf8Path::new("gate.toml"))?;
//! let app = webhook::router(config.pool()?);
//!
//! let listener = tokio::net::TcpListener::bind(config.listen).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod clearer;
pub mod config;
mod error;
pub mod orchestrator;
pub mod pool;
mod request;
pub mod validator;
pub mod webhook;

pub use clearer::{QuarantineClearer, ReleaseOutcome};
pub use config::{ConfigError, GateConfig};
pub use error::{ClearanceError, ScanError};
pub use orchestrator::{Registries, ScanOrchestrator, ScanOutcome};
pub use pool::{ScanHandle, ScanPool, ScanRecord, ScanStatus};
pub use request::{MissingField, ScanRequest};
pub use validator::{Verdict, validate};
