use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use jobq_core::{ExecuteError, ExportExecutor};

/// Client for the external executor service that actually runs the read-only
/// query and streams the result set to the object store. The worker only
/// names the blob and passes the deadline along; the service owns credentials
/// and the columnar encoding.
pub struct HttpExportExecutor {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ExecuteRequestBody<'a> {
    query_sql: &'a str,
    storage_account: &'a str,
    storage_container: &'a str,
    blob_path: &'a str,
    deadline_seconds: u64,
}

impl HttpExportExecutor {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("jobq-worker")
            .build()
            .expect("failed to construct reqwest client for the export executor");

        Self { client, base_url }
    }
}

#[async_trait]
impl ExportExecutor for HttpExportExecutor {
    async fn execute_readonly_to_blob(
        &self,
        query_sql: &str,
        storage_account: &str,
        storage_container: &str,
        blob_path: &str,
        deadline: Duration,
    ) -> Result<(), ExecuteError> {
        let body = ExecuteRequestBody {
            query_sql,
            storage_account,
            storage_container,
            blob_path,
            deadline_seconds: deadline.as_secs(),
        };

        let response = self
            .client
            .post(format!("{}/execute", self.base_url))
            .timeout(deadline)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ExecuteError::DeadlineExceeded(deadline)
                } else {
                    ExecuteError::failed("executor_unreachable", error.to_string())
                }
            })?;

        match response.error_for_status() {
            Ok(_) => Ok(()),
            Err(error) => {
                let code = error
                    .status()
                    .map(|status| status.as_u16().to_string())
                    .unwrap_or_else(|| "http_error".to_owned());
                Err(ExecuteError::failed(&code, error.to_string()))
            }
        }
    }
}
