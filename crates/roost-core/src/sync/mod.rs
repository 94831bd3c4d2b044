//! Sync engine: change detection, entity mapping, queueing and the run
//! orchestrators built on top of them.

pub mod batch;
pub mod change;
pub mod deletion;
pub mod health;
pub mod mapper;
pub mod micro;
pub mod orchestrator;
pub mod queue;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{batch_status, cancel_batch, BatchOutcome, BatchRunner, BatchStatus, SplitUnit};
pub use change::{content_hash, detect_changes, ChangeSet};
pub use deletion::{DeletionCounts, DeletionDetector};
pub use health::{record_health, record_health_quietly};
pub use mapper::{EntityMapper, MapperOptions, SaveOutcome};
pub use micro::{MicroAction, MicroOutcome, MicroSync, ScanStats};
pub use orchestrator::{with_retry, SyncEngine, SyncOptions, SyncReport};
pub use queue::{EnqueueOutcome, SyncQueue};
pub use reconcile::{ReconcileCounts, Reconciler};
