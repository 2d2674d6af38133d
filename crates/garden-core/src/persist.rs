//! Write-behind persistence for garden state.
//!
//! The in-memory [`GardenStateStore`](crate::store::GardenStateStore) is the
//! authority for reads and broadcasts. Every mutation it performs is also
//! described as a [`StoreWrite`] and pushed onto an ordered queue drained by
//! a single [`PersistenceWorker`], which applies it to a
//! [`GardenRepository`] backend with exponential-backoff retries.
//!
//! ```text
//! store mutation ──enqueue──> [ StoreWrite queue ] ──> PersistenceWorker ──> backend
//!                                      ^                      |
//! reading-log query ──────────────────┘        reply <────────┘
//! ```
//!
//! Reading-log queries travel through the same queue, so a query observes
//! every write enqueued before it. The backend is the only holder of the
//! reading log, so a failed query is reported to the caller instead of
//! being retried. A query stuck behind a write that is still retrying gives
//! up after the handle's query timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use garden_types::{Boundary, Cell, CellIndex, ColorReading, GardenId, GeoPoint, PointNo};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::PersistenceConfig;
use crate::error::StorageError;

// =========================================================================
// Records and writes
// =========================================================================

/// Durable state of one garden as loaded at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct GardenRecord {
    /// The garden.
    pub garden_id: GardenId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Stored corner slots.
    pub boundary: Boundary,
    /// Cells that have received at least one reading.
    pub cells: BTreeMap<CellIndex, Cell>,
}

impl GardenRecord {
    /// A record with no corners and no cells.
    pub const fn new(garden_id: GardenId, created_at: DateTime<Utc>) -> Self {
        Self {
            garden_id,
            created_at,
            boundary: Boundary::new(),
            cells: BTreeMap::new(),
        }
    }
}

/// One durable mutation, in the order the store performed it.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    /// Insert the garden row if it does not exist yet.
    CreateGarden {
        /// The garden.
        garden_id: GardenId,
        /// Creation timestamp.
        created_at: DateTime<Utc>,
    },
    /// Overwrite one boundary slot.
    SetBoundaryPoint {
        /// The garden.
        garden_id: GardenId,
        /// Slot number.
        point_no: PointNo,
        /// New corner.
        point: GeoPoint,
    },
    /// Overwrite one grid cell.
    SetCell {
        /// The garden.
        garden_id: GardenId,
        /// Row-major cell index.
        cell_index: CellIndex,
        /// New contents.
        cell: Cell,
    },
    /// Append to the reading log.
    AppendReading(ColorReading),
    /// Remove the garden, its boundary, its cells, and its readings in one
    /// transaction.
    DeleteGarden {
        /// The garden.
        garden_id: GardenId,
    },
}

impl StoreWrite {
    /// The garden this write concerns.
    pub const fn garden_id(&self) -> &GardenId {
        match self {
            Self::CreateGarden { garden_id, .. }
            | Self::SetBoundaryPoint { garden_id, .. }
            | Self::SetCell { garden_id, .. }
            | Self::DeleteGarden { garden_id } => garden_id,
            Self::AppendReading(reading) => &reading.garden_id,
        }
    }

    /// Short name for log fields.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateGarden { .. } => "create_garden",
            Self::SetBoundaryPoint { .. } => "set_boundary_point",
            Self::SetCell { .. } => "set_cell",
            Self::AppendReading(_) => "append_reading",
            Self::DeleteGarden { .. } => "delete_garden",
        }
    }
}

// =========================================================================
// Backend seam
// =========================================================================

/// A durable store for garden state.
///
/// Implementations must keep referential integrity: boundary points, cells,
/// and readings may only be written for a garden that exists, and
/// [`StoreWrite::DeleteGarden`] removes all four record kinds atomically.
pub trait GardenRepository: Send + Sync + 'static {
    /// Load every stored garden with its boundary and non-empty cells.
    fn load_gardens(&self) -> impl Future<Output = Result<Vec<GardenRecord>, StorageError>> + Send;

    /// Apply one write.
    fn apply(&self, write: &StoreWrite) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// The reading log of one garden, oldest first.
    fn readings(
        &self,
        garden_id: &GardenId,
    ) -> impl Future<Output = Result<Vec<ColorReading>, StorageError>> + Send;
}

// =========================================================================
// Retry policy
// =========================================================================

/// How long a reading-log query waits for the queue by default.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Exponential backoff applied to failed writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per write before it is abandoned; `0` retries forever.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap for the doubling delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempts` failures.
    pub const fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }

    /// Delay to wait after the given number of failed attempts (1-based).
    pub fn backoff(&self, attempts: u32) -> Duration {
        let doublings = attempts.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(2_u32.saturating_pow(doublings))
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PersistenceConfig::default())
    }
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

// =========================================================================
// Queue handle
// =========================================================================

type ReadingsReply = oneshot::Sender<Result<Vec<ColorReading>, StorageError>>;

enum Command {
    Write(StoreWrite),
    Readings {
        garden_id: GardenId,
        reply: ReadingsReply,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Sending side of the persistence queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<Command>,
    query_timeout: Duration,
}

impl PersistenceHandle {
    /// Bound the time [`readings`](Self::readings) waits for the worker.
    #[must_use]
    pub const fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    /// Queue a write. Never blocks; if the worker has stopped the write is
    /// logged at `error` level.
    pub fn enqueue(&self, write: StoreWrite) {
        if let Err(mpsc::error::SendError(Command::Write(lost))) = self.tx.send(Command::Write(write))
        {
            error!(
                garden_id = %lost.garden_id(),
                kind = lost.kind(),
                write = ?lost,
                "Persistence worker stopped, write not persisted"
            );
        }
    }

    /// Fetch a garden's reading log after all previously queued writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend query fails, the worker has
    /// stopped, or the queue does not reach the query within the timeout
    /// (a backend outage keeps earlier writes retrying).
    pub async fn readings(&self, garden_id: &GardenId) -> Result<Vec<ColorReading>, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Readings {
                garden_id: garden_id.clone(),
                reply,
            })
            .map_err(|e| StorageError::new(format!("persistence worker stopped: {e}")))?;
        match tokio::time::timeout(self.query_timeout, rx).await {
            Ok(reply) => reply.map_err(|e| {
                StorageError::new(format!("persistence worker dropped the query: {e}"))
            })?,
            Err(e) => {
                warn!(
                    garden_id = %garden_id,
                    timeout_ms = u64::try_from(self.query_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Reading log query timed out behind pending writes"
                );
                Err(StorageError::new(format!(
                    "reading log unavailable, storage is not keeping up: {e}"
                )))
            }
        }
    }

    /// Wait until every write queued before this call has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the worker has stopped.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush { reply })
            .map_err(|e| StorageError::new(format!("persistence worker stopped: {e}")))?;
        rx.await
            .map_err(|e| StorageError::new(format!("persistence worker dropped the flush: {e}")))
    }
}

// =========================================================================
// Worker
// =========================================================================

/// Drains the persistence queue into a backend, one command at a time.
pub struct PersistenceWorker<R> {
    repo: R,
    rx: mpsc::UnboundedReceiver<Command>,
    policy: RetryPolicy,
}

impl<R: GardenRepository> PersistenceWorker<R> {
    /// Create a worker and the handle that feeds it.
    pub fn new(repo: R, policy: RetryPolicy) -> (Self, PersistenceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PersistenceHandle {
            tx,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        };
        (Self { repo, rx, policy }, handle)
    }

    /// Run until every [`PersistenceHandle`] is dropped and the queue is
    /// empty.
    pub async fn run(mut self) {
        info!("Persistence worker started");
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Write(write) => {
                    self.apply_with_retry(&write).await;
                }
                Command::Readings { reply, .. } if reply.is_closed() => {
                    debug!("Reading log query abandoned by its caller, skipped");
                }
                Command::Readings { garden_id, reply } => {
                    let result = self.repo.readings(&garden_id).await;
                    if let Err(e) = &result {
                        warn!(garden_id = %garden_id, error = %e, "Reading log query failed");
                    }
                    // The requester may have gone away; nothing to do then.
                    let _ = reply.send(result);
                }
                Command::Flush { reply } => {
                    let _ = reply.send(());
                }
            }
        }
        info!("Persistence worker drained and stopped");
    }

    /// Apply a write, retrying per the policy. Returns whether it landed.
    async fn apply_with_retry(&self, write: &StoreWrite) -> bool {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match self.repo.apply(write).await {
                Ok(()) => {
                    if attempts > 1 {
                        info!(
                            garden_id = %write.garden_id(),
                            kind = write.kind(),
                            attempts,
                            "Persistence write succeeded after retry"
                        );
                    } else {
                        debug!(garden_id = %write.garden_id(), kind = write.kind(), "Persisted");
                    }
                    return true;
                }
                Err(e) if self.policy.allows_retry(attempts) => {
                    let delay = self.policy.backoff(attempts);
                    warn!(
                        garden_id = %write.garden_id(),
                        kind = write.kind(),
                        attempt = attempts,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Persistence write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        garden_id = %write.garden_id(),
                        kind = write.kind(),
                        attempts,
                        error = %e,
                        write = ?write,
                        "Persistence write abandoned after exhausting retries"
                    );
                    return false;
                }
            }
        }
    }
}

/// Spawn a [`PersistenceWorker`] on the Tokio runtime.
///
/// The returned [`JoinHandle`] completes once every handle clone has been
/// dropped and the remaining queue has been written.
pub fn spawn_persistence<R: GardenRepository>(
    repo: R,
    policy: RetryPolicy,
) -> (PersistenceHandle, JoinHandle<()>) {
    let (worker, handle) = PersistenceWorker::new(repo, policy);
    let task = tokio::spawn(worker.run());
    (handle, task)
}
