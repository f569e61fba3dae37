//! # jobq-core
//!
//! A durable job queue for long-running read-only analytical exports, backed
//! by a single PostgreSQL table. Clients enqueue parameterized read-only
//! queries; workers claim jobs under a cluster-global parallelism cap, run
//! them against an external executor that streams results to an object-store
//! blob, and record terminal status. Transient failures retry with a linearly
//! capped backoff, crashed workers are detected and their jobs requeued, and
//! finished rows are purged on a retention window.

mod ops;

// We do this pattern (privately use a module, then re-export parts of it) so
// we can refactor the internals without breaking the public API.

// Types
mod types;
pub use types::Job;
pub use types::JobStatus;
pub use types::NewExportJob;
pub use types::QueueMetrics;
pub use types::RunOutcome;

// Errors
mod error;
pub use error::QueueError;

// Admission
mod admission;
pub use admission::check_read_only;

// Executor seam
mod executor;
pub use executor::ExecuteError;
pub use executor::ExportExecutor;

// Slot semaphore
mod slots;
pub use slots::SLOT_LOCK_NAMESPACE;

// Public surface: client, worker and janitor wrappers
mod queue;
pub use queue::ExportQueue;
pub use queue::ExportWorker;
pub use queue::Janitor;

// Config
mod config;
pub use config::PoolConfig;
pub use config::QueueLimits;
pub use config::APPLICATION_NAME;
pub use config::DEFAULT_MAX_ATTEMPTS;

pub mod health;
pub mod metrics_consts;
pub mod serve_metrics;
