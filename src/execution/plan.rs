use crate::types::inventory::Host;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Tag that keeps a task in the graph regardless of `--tags`
pub const ALWAYS_TAG: &str = "always";

/// Ordered, immutable set of idempotent operations defining the target state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub tasks: Vec<Task>,
}

impl TaskGraph {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    /// Keep tasks carrying any of `tags` (plus `always` tasks), preserving
    /// declared order
    pub fn filter_tags(&self, tags: &[String]) -> TaskGraph {
        if tags.is_empty() {
            return self.clone();
        }

        let tasks = self
            .tasks
            .iter()
            .filter(|task| {
                task.tags.contains(ALWAYS_TAG) || tags.iter().any(|t| task.tags.contains(t))
            })
            .cloned()
            .collect();
        TaskGraph { tasks }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    /// Position in the declared order
    pub sequence: usize,
    pub module: String,
    pub args: HashMap<String, serde_json::Value>,
    pub conditions: Vec<Condition>,
    pub target: TargetSelector,
    pub tags: BTreeSet<String>,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    Exists,
    NotExists,
}

/// Hosts a task applies to; empty lists mean every host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    pub groups: Vec<String>,
    pub hosts: Vec<String>,
}

impl TargetSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.groups.is_empty() && self.hosts.is_empty()
    }

    pub fn matches(&self, host: &Host) -> bool {
        self.is_all()
            || self.hosts.iter().any(|h| *h == host.name)
            || self.groups.iter().any(|g| host.is_member_of(g))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Stop evaluating further tasks for the host
    #[default]
    Abort,
    Continue,
}
