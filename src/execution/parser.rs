use crate::execution::{
    Condition, FailurePolicy, TargetSelector, Task, TaskGraph, TaskGraphError,
};
use crate::modules::{ModuleArgs, ModuleRegistry};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PlaybookFile {
    #[serde(default)]
    tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Deserialize)]
struct TaskDefinition {
    name: String,
    id: Option<String>,
    #[serde(default)]
    when: Vec<Condition>,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    continue_on_error: bool,
    /// Whatever is left is the action: `<module>: { args }`
    #[serde(flatten)]
    action: HashMap<String, serde_json::Value>,
}

/// Loads playbooks into a validated task graph
pub struct TaskGraphParser<'a> {
    registry: &'a ModuleRegistry,
}

impl<'a> TaskGraphParser<'a> {
    pub fn new(registry: &'a ModuleRegistry) -> Self {
        Self { registry }
    }

    pub fn parse_file(&self, path: &Path) -> Result<TaskGraph, TaskGraphError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TaskGraphError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => TaskGraphError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        self.parse(&content)
    }

    pub fn parse(&self, content: &str) -> Result<TaskGraph, TaskGraphError> {
        let playbook: PlaybookFile =
            serde_yaml::from_str(content).map_err(|e| TaskGraphError::InvalidYaml {
                reason: e.to_string(),
            })?;

        let mut seen_ids = HashSet::new();
        let mut tasks = Vec::with_capacity(playbook.tasks.len());

        for (sequence, definition) in playbook.tasks.into_iter().enumerate() {
            let task = self.build_task(sequence, definition)?;
            if !seen_ids.insert(task.id.clone()) {
                return Err(TaskGraphError::DuplicateTaskId { id: task.id });
            }
            tasks.push(task);
        }

        debug!("Parsed task graph with {} tasks", tasks.len());
        Ok(TaskGraph::new(tasks))
    }

    fn build_task(
        &self,
        sequence: usize,
        definition: TaskDefinition,
    ) -> Result<Task, TaskGraphError> {
        let TaskDefinition {
            name,
            id,
            when,
            groups,
            hosts,
            tags,
            continue_on_error,
            action,
        } = definition;

        if action.len() > 1 {
            let mut actions: Vec<String> = action.into_keys().collect();
            actions.sort();
            return Err(TaskGraphError::MultipleActions {
                task: name,
                actions,
            });
        }
        let Some((module_name, raw_args)) = action.into_iter().next() else {
            return Err(TaskGraphError::MissingAction { task: name });
        };

        let module = self.registry.get_module(&module_name).ok_or_else(|| {
            TaskGraphError::UnknownModule {
                task: name.clone(),
                module: module_name.clone(),
            }
        })?;

        let args: HashMap<String, serde_json::Value> = match raw_args {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            serde_json::Value::Null => HashMap::new(),
            other => {
                return Err(TaskGraphError::InvalidArgs {
                    task: name,
                    reason: format!("expected a mapping of arguments, got {other}"),
                })
            }
        };

        let module_args = ModuleArgs::new(args);
        module
            .validate_args(&module_args)
            .map_err(|e| TaskGraphError::InvalidArgs {
                task: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Task {
            id: id.unwrap_or_else(|| format!("task-{}", sequence + 1)),
            name,
            sequence,
            module: module_name,
            args: module_args.args,
            conditions: when,
            target: TargetSelector { groups, hosts },
            tags,
            failure_policy: if continue_on_error {
                FailurePolicy::Continue
            } else {
                FailurePolicy::Abort
            },
        })
    }
}
