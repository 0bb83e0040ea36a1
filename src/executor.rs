use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notifier::FailureContext;
use crate::{
    CommandExecutor, Decision, FailureNotifier, GraphRun, RetryExecutor, RetryOutcome,
    RunContext, RunState, StagecuterError, SuccessPolicy, TaskGraph, TaskNode, TaskState,
};

/// Walks a [`TaskGraph`] once, producing a [`GraphRun`].
///
/// Tasks run one at a time in topological order. Each task is gated by its
/// trigger rule, invoked through the command executor under its retry budget,
/// and reported to the failure notifier if it fails for good.
pub struct GraphExecutor {
    command: Arc<dyn CommandExecutor>,
    notifier: FailureNotifier,
    success_policy: SuccessPolicy,
}

impl GraphExecutor {
    pub fn new(command: Arc<dyn CommandExecutor>) -> Self {
        Self {
            command,
            notifier: FailureNotifier::default(),
            success_policy: SuccessPolicy::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: FailureNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_success_policy(mut self, policy: SuccessPolicy) -> Self {
        self.success_policy = policy;
        self
    }

    pub async fn execute(
        &self,
        graph: &TaskGraph,
        ctx: RunContext,
        cancel: CancellationToken,
    ) -> GraphRun {
        let mut run = GraphRun::new(graph, ctx);
        info!(
            pipeline = graph.id(),
            run_id = run.run_id(),
            tasks = graph.len(),
            "graph run started"
        );

        for node in graph.topological_order() {
            if cancel.is_cancelled() {
                break;
            }

            // Topological order guarantees every upstream instance is terminal.
            let upstream: Vec<TaskState> = node
                .dependencies()
                .iter()
                .map(|dep| run.state_of(dep))
                .collect();

            match node.trigger_rule().decide(&upstream) {
                Decision::Run => self.run_task(&mut run, node, &cancel).await,
                Decision::Skip => {
                    debug!(run_id = run.run_id(), task = node.name(), rule = %node.trigger_rule(), "task skipped");
                    settle_without_running(&mut run, node, TaskState::Skipped);
                }
                Decision::UpstreamFailed => {
                    info!(run_id = run.run_id(), task = node.name(), "upstream failed; not running task");
                    settle_without_running(&mut run, node, TaskState::UpstreamFailed);
                }
            }
            run.record_terminal(node.name());
        }

        let now = Utc::now();
        // A cancellation that lands after the last task settled changes nothing.
        let interrupted = cancel.is_cancelled()
            && run
                .instances()
                .any(|i| !i.state().is_terminal() || i.state() == TaskState::Cancelled);
        let state = if interrupted {
            run.cancel_remaining(now);
            RunState::Cancelled
        } else {
            self.success_policy
                .evaluate(run.instances().map(|i| i.state()))
        };
        run.complete(state, now);

        match state {
            RunState::Success => info!(run_id = run.run_id(), "graph run succeeded"),
            RunState::Cancelled => warn!(run_id = run.run_id(), "graph run cancelled"),
            _ => {
                let first = run.first_failure().map(|i| i.task().to_string());
                error!(run_id = run.run_id(), state = %state, first_failure = ?first, "graph run did not succeed");
            }
        }

        run
    }

    async fn run_task(&self, run: &mut GraphRun, node: &TaskNode, cancel: &CancellationToken) {
        let run_id = run.run_id().to_string();
        if let Some(instance) = run.instance_mut(node.name()) {
            instance.start(Utc::now());
        }

        let retry = RetryExecutor::new(node.retry_budget());
        let outcome = retry
            .execute_with_retry(cancel, node.name(), |attempt| {
                let command = Arc::clone(&self.command);
                let cancel = cancel.clone();
                let run_id = run_id.clone();
                async move {
                    info!(run_id = %run_id, task = node.name(), attempt, cmd = node.command(), "invoking command");
                    command.run(node.command(), cancel).await
                }
            })
            .await;

        let now = Utc::now();
        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                info!(run_id = %run_id, task = node.name(), attempts, "task succeeded");
                if let Some(instance) = run.instance_mut(node.name()) {
                    instance.finish(TaskState::Success, attempts, Some(value.combined()), None, now);
                }
            }
            RetryOutcome::Exhausted {
                last_error,
                attempts,
            } => {
                let err = StagecuterError::RetryBudgetExhausted {
                    task: node.name().to_string(),
                    attempts,
                    last_error: last_error.diagnostic(),
                };
                error!(run_id = %run_id, task = node.name(), attempts, error = %err, "task failed");
                if let Some(instance) = run.instance_mut(node.name()) {
                    instance.finish(
                        TaskState::Failed,
                        attempts,
                        last_error.output().map(|o| o.combined()),
                        Some(err.to_string()),
                        now,
                    );
                }

                if cancel.is_cancelled() {
                    debug!(run_id = %run_id, task = node.name(), "run cancelled; suppressing failure notification");
                } else {
                    let ctx = FailureContext {
                        pipeline_id: run.pipeline_id().to_string(),
                        run_id: run_id.clone(),
                        task_id: node.name().to_string(),
                        error: err.to_string(),
                    };
                    self.notifier.on_task_terminal_failure(&ctx).await;
                }
            }
            RetryOutcome::Cancelled { attempts } => {
                info!(run_id = %run_id, task = node.name(), attempts, "task cancelled");
                if let Some(instance) = run.instance_mut(node.name()) {
                    instance.finish(TaskState::Cancelled, attempts, None, None, now);
                }
            }
        }
    }
}

fn settle_without_running(run: &mut GraphRun, node: &TaskNode, state: TaskState) {
    if let Some(instance) = run.instance_mut(node.name()) {
        instance.finish(state, 0, None, None, Utc::now());
    }
}
