use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Enumeration of failures the executor can report. Both variants put the job
/// on the retry path; the distinction only shows up in diagnostics.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("[{code}] {message}")]
    Failed { code: String, message: String },
    #[error("[deadline_exceeded] export did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

impl ExecuteError {
    pub fn failed(code: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            code: code.to_owned(),
            message: message.into(),
        }
    }
}

/// The narrow seam to the external query executor: run a read-only query and
/// stream its result set to the named object-store blob, honoring `deadline`
/// by aborting and raising.
///
/// Empty result sets still count as success; whether a zero-row blob
/// physically exists is the executor's business.
#[async_trait]
pub trait ExportExecutor: Send + Sync {
    async fn execute_readonly_to_blob(
        &self,
        query_sql: &str,
        storage_account: &str,
        storage_container: &str,
        blob_path: &str,
        deadline: Duration,
    ) -> Result<(), ExecuteError>;
}
