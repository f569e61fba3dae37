pub const JOBS_ENQUEUED: &str = "jobq_jobs_enqueued";
pub const JOBS_CLAIMED: &str = "jobq_jobs_claimed";
pub const JOBS_SUCCEEDED: &str = "jobq_jobs_succeeded";
pub const JOBS_RETRIED: &str = "jobq_jobs_retried";
pub const JOBS_FAILED: &str = "jobq_jobs_failed";
pub const JOBS_CANCELLED: &str = "jobq_jobs_cancelled";
// Counts kill *requests*; a request may cancel the row without managing to
// signal the backend.
pub const JOBS_KILLED: &str = "jobq_kill_requests";
pub const JOBS_ORPHAN_REQUEUED: &str = "jobq_jobs_orphan_requeued";
pub const JOBS_PURGED: &str = "jobq_jobs_purged";

pub const RUN_DURATION: &str = "jobq_run_duration_seconds";
pub const ENQUEUE_DURATION: &str = "jobq_enqueue_duration_seconds";
