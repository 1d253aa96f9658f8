use crate::config::RunConfig;
use crate::execution::{FailurePolicy, Task, TaskGraph};
use crate::modules::{
    ArgumentResolver, ConvergenceModule, ModuleArgs, ModuleContext, ModuleRegistry, StateCheck,
};
use crate::runtime::{
    conditions::{ConditionContext, ConditionEvaluator},
    facts::{FactCollector, FactReport, IdentityRole},
    progress::RunReporter,
    state::{ExecutionResult, ResultStore, RunSummary, TaskStatus},
    ExecutionError,
};
use crate::secrets::SecretsProvider;
use crate::transport::Transport;
use crate::types::Host;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const ABORTED_BEFORE_START: &str = "run aborted before host started";

/// Converges a fleet: hosts in parallel up to `forks`, tasks strictly in
/// order within each host
#[derive(Clone)]
pub struct ConvergenceExecutor {
    config: Arc<RunConfig>,
    registry: Arc<ModuleRegistry>,
    transport: Arc<dyn Transport>,
    secrets: Arc<dyn SecretsProvider>,
    reporter: RunReporter,
}

impl ConvergenceExecutor {
    pub fn new(
        config: RunConfig,
        registry: ModuleRegistry,
        transport: Arc<dyn Transport>,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Self {
        let reporter = RunReporter::new(config.output);
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            transport,
            secrets,
            reporter,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the task graph against `hosts`. Cancelling `cancel` (or hitting
    /// the configured run timeout) stops hosts that have not started and
    /// lets in-flight hosts finish their current task.
    pub async fn run(
        &self,
        hosts: &[Arc<Host>],
        graph: Arc<TaskGraph>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        let store = ResultStore::new();
        let semaphore = Arc::new(Semaphore::new(self.config.forks.max(1)));

        tracing::info!(
            "Run {} started: {} hosts, {} tasks, forks {}{}",
            run_id,
            hosts.len(),
            graph.len(),
            self.config.forks,
            if self.config.check_mode { ", check mode" } else { "" }
        );

        let timer = self.config.run_timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::warn!("Run timeout of {:?} reached, aborting", timeout);
                cancel.cancel();
            })
        });

        let (names, handles): (Vec<_>, Vec<_>) = hosts
            .iter()
            .map(|host| {
                let executor = self.clone();
                let host = Arc::clone(host);
                let graph = Arc::clone(&graph);
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                let store = store.clone();

                let name = host.name.clone();
                let handle = tokio::spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    match permit {
                        Some(_permit) if !cancel.is_cancelled() => {
                            executor.converge_host(&host, &graph, &cancel, &store).await
                        }
                        _ => {
                            store
                                .push(ExecutionResult::for_host(
                                    &host.name,
                                    TaskStatus::Skipped,
                                    ABORTED_BEFORE_START,
                                    Utc::now(),
                                    Default::default(),
                                ))
                                .await
                        }
                    }
                });
                (name, handle)
            })
            .unzip();

        for (name, outcome) in names.into_iter().zip(join_all(handles).await) {
            if let Err(e) = outcome {
                let error = ExecutionError::HostTaskPanicked {
                    host: name.clone(),
                    reason: e.to_string(),
                };
                tracing::error!("{}", error);
                store
                    .push(ExecutionResult::for_host(
                        &name,
                        TaskStatus::Failed,
                        error.to_string(),
                        Utc::now(),
                        Default::default(),
                    ))
                    .await;
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let aborted = cancel.is_cancelled();
        let summary = RunSummary::from_results(
            run_id,
            hosts,
            store.snapshot().await,
            self.config.check_mode,
            aborted,
            started_at,
            clock.elapsed(),
        );

        tracing::info!(
            "Run {} finished in {:?}: {} changed, {} failed{}",
            summary.run_id,
            summary.duration,
            summary.totals.changed,
            summary.totals.failed,
            if aborted { " (aborted)" } else { "" }
        );
        summary
    }

    /// Gather facts, then walk the task graph in declared order
    pub async fn converge_host(
        &self,
        host: &Host,
        graph: &TaskGraph,
        cancel: &CancellationToken,
        store: &ResultStore,
    ) {
        self.reporter.report_host_start(&host.name, graph.len());
        let started_at = Utc::now();
        let clock = Instant::now();

        let collector = FactCollector::new(self.transport.as_ref(), &self.config.fact_retry);
        let report = match collector.collect(host).await {
            Ok(report) => report,
            Err(e) => {
                let result = ExecutionResult::for_host(
                    &host.name,
                    TaskStatus::Failed,
                    e.to_string(),
                    started_at,
                    clock.elapsed(),
                );
                self.reporter.report_task_complete(&result);
                store.push(result).await;
                return;
            }
        };
        if let Some(degraded) = &report.degraded {
            tracing::warn!("{}; continuing with partial facts", degraded);
        }

        let conditions = ConditionContext::for_host(&report.facts, host);

        for (index, task) in graph.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("{}: run aborted, stopping before {}", host.name, task.id);
                if index == 0 {
                    store
                        .push(ExecutionResult::for_host(
                            &host.name,
                            TaskStatus::Skipped,
                            ABORTED_BEFORE_START,
                            started_at,
                            clock.elapsed(),
                        ))
                        .await;
                }
                break;
            }

            let result = self.execute_task(host, task, &report, &conditions).await;
            self.reporter.report_task_complete(&result);
            let halt =
                result.status == TaskStatus::Failed && task.failure_policy == FailurePolicy::Abort;
            store.push(result).await;

            if halt {
                tracing::warn!(
                    "{}: halting after failed task {}",
                    host.name,
                    task.id
                );
                break;
            }
        }
    }

    /// Applicability, current-state check, then (outside check mode) the
    /// mutating action
    pub async fn execute_task(
        &self,
        host: &Host,
        task: &Task,
        report: &FactReport,
        conditions: &ConditionContext,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let (status, message) = self.evaluate(host, task, report, conditions).await;

        ExecutionResult {
            host: host.name.clone(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            sequence: Some(task.sequence),
            status,
            message,
            duration: clock.elapsed(),
            started_at,
        }
    }

    async fn evaluate(
        &self,
        host: &Host,
        task: &Task,
        report: &FactReport,
        conditions: &ConditionContext,
    ) -> (TaskStatus, String) {
        if !task.target.matches(host) {
            return (TaskStatus::Skipped, "host not targeted".to_string());
        }
        match ConditionEvaluator::evaluate_conditions(&task.conditions, conditions) {
            Ok(true) => {}
            Ok(false) => return (TaskStatus::Skipped, "conditions not met".to_string()),
            Err(e) => return (TaskStatus::Failed, e.to_string()),
        }

        let Some(module) = self.registry.get_module(&task.module) else {
            let error = ExecutionError::ModuleNotFound {
                module: task.module.clone(),
            };
            return (TaskStatus::Failed, error.to_string());
        };

        let resolver = ArgumentResolver::new(&host.variables, self.secrets.as_ref());
        let args = match resolver.resolve(&task.args).await {
            Ok(args) => args,
            Err(e) => return (TaskStatus::Failed, e.to_string()),
        };
        let redactor = args.redactor().clone();

        // Only bootstrap tasks may use the fallback identity, and only on
        // hosts where the control identity was rejected
        let target = if module.uses_bootstrap_identity() && report.identity == IdentityRole::Bootstrap
        {
            host.bootstrap_target()
        } else {
            host.control_target()
        };
        let context = ModuleContext::new(host, target, &report.facts, self.transport.as_ref())
            .with_redactor(redactor.clone());

        let (status, message) = self.converge(module, &args, &context, task).await;
        (status, redactor.redact(&message).into_owned())
    }

    async fn converge(
        &self,
        module: &dyn ConvergenceModule,
        args: &ModuleArgs,
        context: &ModuleContext<'_>,
        task: &Task,
    ) -> (TaskStatus, String) {
        match module.check(args, context).await {
            Err(e) => (TaskStatus::Failed, e.to_string()),
            Ok(StateCheck::Satisfied) => (TaskStatus::Unchanged, String::new()),
            Ok(StateCheck::Drift { reason }) if self.config.check_mode => {
                (TaskStatus::Changed, format!("would change: {reason}"))
            }
            Ok(StateCheck::Drift { reason }) => {
                tracing::debug!(
                    "{} [{}]: {}",
                    context.host.name,
                    task.id,
                    args.redactor().redact(&reason)
                );
                match module.apply(args, context).await {
                    Ok(message) => (TaskStatus::Changed, message),
                    Err(e) => (TaskStatus::Failed, e.to_string()),
                }
            }
        }
    }
}
