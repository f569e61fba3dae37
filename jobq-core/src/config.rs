use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

/// Application name every pool session reports to Postgres. The kill path
/// uses it to recognize queue-owned backends in `pg_stat_activity`.
pub const APPLICATION_NAME: &str = "jobq";

/// Max attempts assigned to jobs that don't ask for a specific budget.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

pub const DEFAULT_MAX_PARALLEL_JOBS: i32 = 4;
pub const DEFAULT_MIN_FREE_CONNECTIONS: i32 = 5;

/// A pool config object, designed to be passable across API boundaries.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: Option<u32>,         // Default to 10
    pub min_connections: Option<u32>,         // Default to 1
    pub acquire_timeout_seconds: Option<u64>, // Default to 30
    pub max_lifetime_seconds: Option<u64>,    // Default to 300
    pub idle_timeout_seconds: Option<u64>,    // Default to 60
}

impl PoolConfig {
    pub fn new(db_url: &str) -> Self {
        Self {
            db_url: db_url.to_owned(),
            max_connections: None,
            min_connections: None,
            acquire_timeout_seconds: None,
            max_lifetime_seconds: None,
            idle_timeout_seconds: None,
        }
    }

    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        let options =
            PgConnectOptions::from_str(&self.db_url)?.application_name(APPLICATION_NAME);

        PgPoolOptions::new()
            .max_connections(self.max_connections.unwrap_or(10))
            .min_connections(self.min_connections.unwrap_or(1))
            .max_lifetime(Duration::from_secs(
                self.max_lifetime_seconds.unwrap_or(300),
            ))
            .idle_timeout(Duration::from_secs(self.idle_timeout_seconds.unwrap_or(60)))
            .acquire_timeout(Duration::from_secs(
                self.acquire_timeout_seconds.unwrap_or(30),
            ))
            .connect_with(options)
            .await
    }
}

/// Cluster-wide claim limits, read from `export_queue_settings` on every
/// claim. Missing or malformed values silently fall back to the defaults, and
/// configured values are clamped into their valid ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Size of the advisory-lock slot set; clamped to [1, 10000].
    pub max_parallel_jobs: i32,
    /// Claims yield while fewer than this many connections are free; clamped
    /// to [0, 1000].
    pub min_free_connections: i32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
            min_free_connections: DEFAULT_MIN_FREE_CONNECTIONS,
        }
    }
}

impl QueueLimits {
    pub(crate) fn apply(&mut self, key: &str, value: &str) {
        match key {
            "max_parallel_jobs" => {
                if let Ok(parsed) = value.trim().parse::<i32>() {
                    self.max_parallel_jobs = parsed.clamp(1, 10_000);
                }
            }
            "min_free_connections" => {
                if let Ok(parsed) = value.trim().parse::<i32>() {
                    self.min_free_connections = parsed.clamp(0, 1_000);
                }
            }
            _ => {}
        }
    }
}
