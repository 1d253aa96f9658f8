use crate::types::Host;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Task id recorded for host-level outcomes (fact gathering, abort)
pub const HOST_TASK_ID: &str = "gather_facts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Changed,
    Unchanged,
    Skipped,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one (host, task) pair; never modified once recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub host: String,
    pub task_id: String,
    pub task_name: String,
    /// Position in the task graph; None for host-level results
    pub sequence: Option<usize>,
    pub status: TaskStatus,
    pub message: String,
    #[serde(with = "serde_duration_ms")]
    pub duration: Duration,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Result not tied to a task, e.g. a host that could not be reached
    pub fn for_host(
        host: &str,
        status: TaskStatus,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            host: host.to_string(),
            task_id: HOST_TASK_ID.to_string(),
            task_name: "gather facts".to_string(),
            sequence: None,
            status,
            message: message.into(),
            duration,
            started_at,
        }
    }
}

/// Append-only result collection shared by all host workers
#[derive(Debug, Default, Clone)]
pub struct ResultStore {
    results: Arc<Mutex<Vec<ExecutionResult>>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, result: ExecutionResult) {
        self.results.lock().await.push(result);
    }

    pub async fn snapshot(&self) -> Vec<ExecutionResult> {
        self.results.lock().await.clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub changed: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Changed => self.changed += 1,
            TaskStatus::Unchanged => self.unchanged += 1,
            TaskStatus::Skipped => self.skipped += 1,
            TaskStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.changed + self.unchanged + self.skipped + self.failed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSummary {
    pub host: String,
    pub best_effort: bool,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub check_mode: bool,
    pub started_at: DateTime<Utc>,
    #[serde(with = "serde_duration_ms")]
    pub duration: Duration,
    pub aborted: bool,
    pub success: bool,
    pub totals: StatusCounts,
    /// In inventory order
    pub hosts: Vec<HostSummary>,
    /// Host order, then task order
    pub results: Vec<ExecutionResult>,
}

impl RunSummary {
    /// Pure reduction over the result set. The run succeeds when it was
    /// not aborted and every failure belongs to a best-effort host.
    pub fn from_results(
        run_id: String,
        hosts: &[Arc<Host>],
        mut results: Vec<ExecutionResult>,
        check_mode: bool,
        aborted: bool,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        let order: HashMap<&str, usize> = hosts
            .iter()
            .enumerate()
            .map(|(i, h)| (h.name.as_str(), i))
            .collect();
        results.sort_by_key(|r| {
            (
                order.get(r.host.as_str()).copied().unwrap_or(usize::MAX),
                r.sequence.map_or(0, |s| s + 1),
            )
        });

        let mut per_host: HashMap<&str, StatusCounts> = HashMap::new();
        let mut totals = StatusCounts::default();
        for result in &results {
            totals.record(result.status);
            per_host
                .entry(result.host.as_str())
                .or_default()
                .record(result.status);
        }

        let host_summaries: Vec<HostSummary> = hosts
            .iter()
            .map(|h| HostSummary {
                host: h.name.clone(),
                best_effort: h.best_effort,
                counts: per_host.get(h.name.as_str()).copied().unwrap_or_default(),
            })
            .collect();

        let blocking_failure = host_summaries
            .iter()
            .any(|h| !h.best_effort && h.counts.failed > 0);

        Self {
            run_id,
            check_mode,
            started_at,
            duration,
            aborted,
            success: !aborted && !blocking_failure,
            totals,
            hosts: host_summaries,
            results,
        }
    }

    pub fn results_for<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a ExecutionResult> {
        self.results.iter().filter(move |r| r.host == host)
    }
}

mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
