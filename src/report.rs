//! Records handed to the reporting layer
//!
//! Every check the CLI performs yields one [`TestRecord`]. Rendering beyond
//! a plain text line or a JSON document is left to downstream tooling.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConformanceError;

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The server behaved as required.
    Passed,
    /// The server misbehaved or could not be reached.
    Failed,
    /// Not applicable to this server or version.
    Skipped,
}

impl TestStatus {
    /// Fixed-width colored tag for terminal output.
    pub fn colored_tag(&self) -> String {
        match self {
            TestStatus::Passed => format!("[{}]", "PASS".green()),
            TestStatus::Failed => format!("[{}]", "FAIL".red()),
            TestStatus::Skipped => format!("[{}]", "SKIP".yellow()),
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// One check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    /// Check name, e.g. `initialize`.
    pub name: String,
    /// Outcome.
    pub status: TestStatus,
    /// Wall time spent on the check.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// One-line human summary.
    pub message: String,
    /// Structured context (negotiated record, error code, stderr tail).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
    /// When the check finished.
    pub finished_at: DateTime<Utc>,
}

impl TestRecord {
    fn new(name: &str, status: TestStatus, duration: Duration, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            duration,
            message,
            detail: Value::Null,
            finished_at: Utc::now(),
        }
    }

    /// A passing record.
    pub fn passed(name: &str, duration: Duration, message: impl Into<String>) -> Self {
        Self::new(name, TestStatus::Passed, duration, message.into())
    }

    /// A failing record.
    pub fn failed(name: &str, duration: Duration, message: impl Into<String>) -> Self {
        Self::new(name, TestStatus::Failed, duration, message.into())
    }

    /// A skipped record.
    pub fn skipped(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, TestStatus::Skipped, Duration::ZERO, message.into())
    }

    /// A failing record built from an error. JSON-RPC codes land in `detail`.
    pub fn from_error(name: &str, duration: Duration, error: &anyhow::Error) -> Self {
        let mut record = Self::failed(name, duration, error.to_string());
        if let Some(code) = error
            .downcast_ref::<ConformanceError>()
            .and_then(ConformanceError::rpc_code)
        {
            record.detail = serde_json::json!({ "code": code });
        }
        record
    }

    /// Attach structured context.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    /// Single-line terminal rendering.
    pub fn to_line(&self) -> String {
        format!(
            "{} {} ({} ms) {}",
            self.status.colored_tag(),
            self.name,
            self.duration.as_millis(),
            self.message
        )
    }
}

/// Times one check and turns its result into a record.
///
/// ```
/// use mcp_conformance::report::{Stopwatch, TestStatus};
///
/// let watch = Stopwatch::start("ping");
/// let record = watch.finish(Ok::<_, anyhow::Error>("pong".to_string()));
/// assert_eq!(record.status, TestStatus::Passed);
/// assert_eq!(record.message, "pong");
/// ```
#[derive(Debug)]
pub struct Stopwatch {
    name: String,
    started: Instant,
}

impl Stopwatch {
    /// Start timing `name`.
    pub fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Close the check with a success message or an error.
    pub fn finish(self, outcome: anyhow::Result<String>) -> TestRecord {
        let elapsed = self.started.elapsed();
        match outcome {
            Ok(message) => TestRecord::passed(&self.name, elapsed, message),
            Err(e) => TestRecord::from_error(&self.name, elapsed, &e),
        }
    }
}

/// Whether every record passed or was skipped.
pub fn all_passed(records: &[TestRecord]) -> bool {
    records.iter().all(|r| r.status != TestStatus::Failed)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
