//! Running scans in the background with a bounded number in flight.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt as _;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::orchestrator::{ScanOrchestrator, ScanOutcome};
use crate::request::ScanRequest;

/// Scans allowed to run at once when none is configured.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Completion records kept when none is configured.
pub const DEFAULT_HISTORY: usize = 256;

/// How a scan ended, as kept in its completion record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ScanStatus {
    /// Every layer passed and the release call returned this status.
    Released {
        /// HTTP status of the release call
        code: u16,
    },
    /// A layer failed the content policy.
    Rejected {
        /// Position of the layer in the manifest
        index: usize,
        /// Digest of the layer
        digest: String,
    },
    /// The scan or the release call failed.
    Failed {
        /// The error, with its causes
        error: String,
    },
    /// The scan panicked.
    Panicked,
}

/// The completion record of one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanRecord {
    /// Unique id of the scan.
    pub id: Uuid,
    /// The scanned image.
    pub request: ScanRequest,
    /// When the scan started running, after waiting for a slot.
    pub started: DateTime<Utc>,
    /// How long the scan ran.
    #[serde(rename = "elapsed_ms", serialize_with = "millis")]
    pub elapsed: Duration,
    /// How the scan ended.
    #[serde(flatten)]
    pub status: ScanStatus,
}

fn millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
}

#[derive(Debug)]
struct History {
    records: Mutex<VecDeque<ScanRecord>>,
    capacity: usize,
}

impl History {
    fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn push(&self, record: ScanRecord) {
        if self.capacity == 0 {
            return;
        }

        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn snapshot(&self) -> Vec<ScanRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

/// Handle to a submitted scan.
///
/// Dropping the handle detaches the scan, it keeps running.
#[derive(Debug)]
pub struct ScanHandle {
    id: Uuid,
    task: JoinHandle<ScanRecord>,
}

impl ScanHandle {
    /// The id the completion record will carry.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the scan to finish.
    pub async fn wait(self) -> Option<ScanRecord> {
        self.task.await.ok()
    }
}

/// Runs scans on the tokio runtime, at most `max_concurrent` at a time, and
/// keeps the most recent completion records.
#[derive(Debug, Clone)]
pub struct ScanPool {
    orchestrator: Arc<ScanOrchestrator>,
    permits: Arc<Semaphore>,
    history: Arc<History>,
}

impl ScanPool {
    /// Create a pool. A `max_concurrent` of zero is treated as one.
    pub fn new(orchestrator: ScanOrchestrator, max_concurrent: usize, history: usize) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            history: Arc::new(History::new(history)),
        }
    }

    /// Schedule a scan. Returns immediately, the scan waits for a free slot in the background.
    pub fn submit(&self, request: ScanRequest) -> ScanHandle {
        let id = Uuid::new_v4();
        let orchestrator = self.orchestrator.clone();
        let permits = self.permits.clone();
        let history = self.history.clone();

        let task = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();

            let started = Utc::now();
            let clock = Instant::now();
            tracing::info!(%id, "Scanning {request}");

            let result = AssertUnwindSafe(orchestrator.run(&request))
                .catch_unwind()
                .await;

            let status = match result {
                Ok(Ok(ScanOutcome::Released(outcome))) => ScanStatus::Released {
                    code: outcome.status.as_u16(),
                },
                Ok(Ok(ScanOutcome::Rejected { index, layer })) => {
                    tracing::warn!(%id, index, digest = %layer.digest, "{request} stays quarantined");
                    ScanStatus::Rejected {
                        index,
                        digest: layer.digest,
                    }
                }
                Ok(Err(error)) => {
                    tracing::error!(%id, "Scan of {request} aborted: {error}");
                    ScanStatus::Failed {
                        error: error.to_string(),
                    }
                }
                Err(_) => {
                    tracing::error!(%id, "Scan of {request} panicked");
                    ScanStatus::Panicked
                }
            };

            let record = ScanRecord {
                id,
                request,
                started,
                elapsed: clock.elapsed(),
                status,
            };
            tracing::debug!(%id, elapsed = ?record.elapsed, "scan finished");

            history.push(record.clone());
            record
        });

        ScanHandle { id, task }
    }

    /// The most recent completion records, oldest first.
    pub fn records(&self) -> Vec<ScanRecord> {
        self.history.snapshot()
    }
}
