//! Enqueue admission: normalize parameters and reject queries that are not
//! obviously read-only.
//!
//! The read-only check is a best-effort textual filter, not a sandbox.
//! Callers of enqueue are trusted; the executor runs under the worker's
//! privileges; admission exists to catch obvious misuse.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::QueueError;
use crate::types::NewExportJob;

pub const MAX_QUERY_CHARS: usize = 100_000;
pub const MIN_PRIORITY: i32 = -1000;
pub const MAX_PRIORITY: i32 = 1000;

pub fn default_max_runtime() -> Duration {
    Duration::minutes(30)
}

pub fn max_allowed_runtime() -> Duration {
    Duration::hours(24)
}

static LEADING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(select|with)\b").expect("leading keyword pattern is valid")
});

static INTO_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\binto\b").expect("into pattern is valid"));

static WRITE_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|merge|truncate|create|alter|drop|grant|revoke|copy|vacuum|analyze|cluster|refresh|reindex|call|do|lock)\b",
    )
    .expect("write keyword pattern is valid")
});

/// Everything enqueue needs after validation, with defaults applied.
#[derive(Debug)]
pub(crate) struct AdmittedJob {
    pub query_sql: String,
    pub storage_account: String,
    pub storage_container: String,
    pub scheduled_at: DateTime<Utc>,
    pub priority: i32,
    pub correlation_id: Option<String>,
    pub max_attempts: i32,
    pub max_runtime: Duration,
}

fn invalid(message: impl Into<String>) -> QueueError {
    QueueError::InvalidArgument(message.into())
}

/// Compute a scan copy of the query: the contents of single-quoted string
/// literals are replaced by spaces, with the quote delimiters preserved and
/// `''` treated as an escaped quote (i.e. literal content). Each blanked
/// character becomes exactly one space, so word boundaries stay put.
pub fn literal_scan_copy(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_literal = false;

    while let Some(c) = chars.next() {
        if !in_literal {
            out.push(c);
            if c == '\'' {
                in_literal = true;
            }
            continue;
        }

        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push_str("  ");
            } else {
                out.push('\'');
                in_literal = false;
            }
        } else {
            out.push(' ');
        }
    }

    out
}

/// Reject queries that are not plainly a read. Operates on the scan copy, so
/// string literals cannot hide or fake keywords.
pub fn check_read_only(query_sql: &str) -> Result<(), QueueError> {
    let scan = literal_scan_copy(query_sql);

    if !LEADING_KEYWORD.is_match(&scan) {
        return Err(invalid("query must start with SELECT or WITH"));
    }
    if scan.contains(';') {
        return Err(invalid("query must not contain ';'"));
    }
    if scan.contains("--") {
        return Err(invalid("query must not contain '--' comments"));
    }
    if scan.contains("/*") {
        return Err(invalid("query must not contain '/*' comments"));
    }
    if INTO_KEYWORD.is_match(&scan) {
        return Err(invalid("query must not contain INTO"));
    }
    if let Some(found) = WRITE_KEYWORDS.find(&scan) {
        return Err(invalid(format!(
            "query must not contain {}",
            found.as_str().to_uppercase()
        )));
    }

    Ok(())
}

pub(crate) fn admit(new_job: NewExportJob) -> Result<AdmittedJob, QueueError> {
    let query_sql = new_job.query_sql.trim();
    if query_sql.is_empty() {
        return Err(invalid("query_sql must not be empty"));
    }
    if query_sql.chars().count() > MAX_QUERY_CHARS {
        return Err(invalid(format!(
            "query_sql must be at most {MAX_QUERY_CHARS} characters"
        )));
    }

    let storage_account = new_job.storage_account.trim();
    if storage_account.is_empty() {
        return Err(invalid("storage_account must not be empty"));
    }
    let storage_container = new_job.storage_container.trim();
    if storage_container.is_empty() {
        return Err(invalid("storage_container must not be empty"));
    }

    let priority = new_job.priority.unwrap_or(0);
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(invalid(format!(
            "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        )));
    }

    let max_runtime = new_job.max_runtime.unwrap_or_else(default_max_runtime);
    if max_runtime <= Duration::zero() || max_runtime > max_allowed_runtime() {
        return Err(invalid("max_runtime must be within (0, 24h]"));
    }

    let max_attempts = new_job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    if max_attempts < 1 {
        return Err(invalid("max_attempts must be at least 1"));
    }

    check_read_only(query_sql)?;

    Ok(AdmittedJob {
        query_sql: query_sql.to_owned(),
        storage_account: storage_account.to_owned(),
        storage_container: storage_container.to_owned(),
        scheduled_at: new_job.scheduled_at.unwrap_or_else(Utc::now),
        priority,
        correlation_id: new_job.correlation_id,
        max_attempts,
        max_runtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_job(query_sql: &str) -> NewExportJob {
        NewExportJob::new(query_sql, "account", "container")
    }

    #[test]
    fn test_scan_copy_blanks_literal_contents() {
        assert_eq!(
            literal_scan_copy("select 'drop table t' as v"),
            "select '            ' as v"
        );
    }

    #[test]
    fn test_scan_copy_keeps_escaped_quotes_inside_literal() {
        // `''` is an escaped quote, so the literal runs to the final quote.
        assert_eq!(literal_scan_copy("select 'it''s'"), "select '     '");
    }

    #[test]
    fn test_scan_copy_blanks_unterminated_literal() {
        assert_eq!(literal_scan_copy("select 'oops"), "select '    ");
    }

    #[test]
    fn test_accepts_plain_selects() {
        for query in [
            "SELECT 1 AS v",
            "  select * from events where ts > now() - interval '7 days'",
            "WITH x AS (SELECT '--comment') SELECT * FROM x",
            "with t as (select 1) select count(*) from t",
            // Keywords inside literals are invisible to the scan.
            "SELECT 'insert update delete; -- /*' AS spell",
        ] {
            assert!(check_read_only(query).is_ok(), "rejected: {query}");
        }
    }

    #[test]
    fn test_rejects_non_select_queries() {
        for query in [
            "INSERT INTO t VALUES (1)",
            "update t set a = 1",
            "EXPLAIN SELECT 1",
            "table t",
        ] {
            assert!(check_read_only(query).is_err(), "accepted: {query}");
        }
    }

    #[test]
    fn test_rejects_statement_chaining_and_comments() {
        assert!(check_read_only("SELECT 1; DROP TABLE t").is_err());
        assert!(check_read_only("SELECT 1 -- hidden").is_err());
        assert!(check_read_only("SELECT /* hidden */ 1").is_err());
    }

    #[test]
    fn test_rejects_write_keywords_anywhere() {
        for query in [
            "SELECT * FROM t WHERE a = delete",
            "SELECT 1 INTO saved",
            "WITH d AS (DELETE FROM t RETURNING *) SELECT * FROM d",
            "SELECT truncate(1.5)", // the word blacklist also matches function names
            "SELECT do_something(1)",
        ] {
            let result = check_read_only(query);
            if query.contains("do_something") {
                // A keyword embedded in a longer identifier is not a word match.
                assert!(result.is_ok(), "rejected: {query}");
            } else {
                assert!(result.is_err(), "accepted: {query}");
            }
        }
    }

    #[test]
    fn test_admit_applies_defaults() {
        let admitted = admit(new_job("  SELECT 1  ")).expect("admission failed");
        assert_eq!(admitted.query_sql, "SELECT 1");
        assert_eq!(admitted.priority, 0);
        assert_eq!(admitted.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(admitted.max_runtime, default_max_runtime());
    }

    #[test]
    fn test_admit_rejects_empty_and_oversized_input() {
        assert!(admit(new_job("   ")).is_err());
        let oversized = format!("SELECT '{}'", "x".repeat(MAX_QUERY_CHARS));
        assert!(admit(new_job(&oversized)).is_err());

        let mut job = new_job("SELECT 1");
        job.storage_account = " ".to_owned();
        assert!(admit(job).is_err());

        let mut job = new_job("SELECT 1");
        job.storage_container = String::new();
        assert!(admit(job).is_err());
    }

    #[test]
    fn test_admit_bounds_priority_and_runtime() {
        let mut job = new_job("SELECT 1");
        job.priority = Some(1001);
        assert!(admit(job).is_err());

        let mut job = new_job("SELECT 1");
        job.priority = Some(-1000);
        assert!(admit(job).is_ok());

        let mut job = new_job("SELECT 1");
        job.max_runtime = Some(Duration::hours(25));
        assert!(admit(job).is_err());

        let mut job = new_job("SELECT 1");
        job.max_runtime = Some(Duration::zero());
        assert!(admit(job).is_err());

        // 1ms is a valid budget at admission; the runner clamps it upward.
        let mut job = new_job("SELECT 1");
        job.max_runtime = Some(Duration::milliseconds(1));
        assert!(admit(job).is_ok());

        let mut job = new_job("SELECT 1");
        job.max_attempts = Some(0);
        assert!(admit(job).is_err());
    }
}
