//! Per-run execution records.
//!
//! A [`GraphRun`] owns one [`TaskInstance`] per node of the graph it was
//! created from. Instances are created up-front in [`TaskState::Pending`] so a
//! finished run always reports the full set of per-task states.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{TaskGraph, TaskNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    UpstreamFailed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }

    /// `Failed` or `UpstreamFailed`.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::UpstreamFailed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Skipped => "skipped",
            TaskState::UpstreamFailed => "upstream_failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        })
    }
}

/// How a finished run's overall state is derived from its task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Success only if every task succeeded. A skipped task fails the run.
    #[default]
    AllSucceeded,
    /// Success if no task failed; skipped tasks are accepted.
    NoneFailed,
}

impl SuccessPolicy {
    pub fn evaluate(&self, states: impl IntoIterator<Item = TaskState>) -> RunState {
        let mut states = states.into_iter();
        let ok = match self {
            SuccessPolicy::AllSucceeded => states.all(|s| s == TaskState::Success),
            SuccessPolicy::NoneFailed => {
                states.all(|s| matches!(s, TaskState::Success | TaskState::Skipped))
            }
        };
        if ok { RunState::Success } else { RunState::Failed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Scheduled,
    Manual,
}

/// Identity of one graph execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub logical_date: DateTime<Utc>,
    pub kind: RunKind,
}

impl RunContext {
    /// Context for the interval boundary `boundary`.
    pub fn scheduled(boundary: DateTime<Utc>) -> Self {
        Self {
            run_id: format!("scheduled__{}", boundary.to_rfc3339()),
            logical_date: boundary,
            kind: RunKind::Scheduled,
        }
    }

    pub fn manual(now: DateTime<Utc>) -> Self {
        Self {
            run_id: format!("manual__{}", now.to_rfc3339()),
            logical_date: now,
            kind: RunKind::Manual,
        }
    }
}

/// One node's execution record within a [`GraphRun`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInstance {
    task: String,
    state: TaskState,
    attempt: u32,
    max_attempts: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    output: Option<String>,
    error: Option<String>,
}

impl TaskInstance {
    pub fn new(node: &TaskNode) -> Self {
        Self {
            task: node.name().to_string(),
            state: TaskState::Pending,
            attempt: 0,
            max_attempts: node.retry_budget().max_attempts(),
            started_at: None,
            ended_at: None,
            output: None,
            error: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Number of command invocations made so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Captured stdout/stderr of the last invocation.
    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        if self.state != TaskState::Pending {
            warn!(task = %self.task, state = %self.state, "ignoring start of non-pending task instance");
            return;
        }
        self.state = TaskState::Running;
        self.started_at = Some(now);
    }

    /// Move to a terminal state. Terminal instances never change again.
    pub(crate) fn finish(
        &mut self,
        state: TaskState,
        attempts: u32,
        output: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            warn!(task = %self.task, state = %self.state, to = %state, "ignoring transition of terminal task instance");
            return;
        }
        self.state = state;
        self.attempt = attempts.min(self.max_attempts);
        self.output = output;
        self.error = error;
        self.ended_at = Some(now);
    }
}

/// One instantiation of a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRun {
    pipeline_id: String,
    run_id: String,
    logical_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    state: RunState,
    tasks: Vec<String>,
    instances: HashMap<String, TaskInstance>,
    execution_order: Vec<String>,
}

impl GraphRun {
    pub fn new(graph: &TaskGraph, ctx: RunContext) -> Self {
        Self {
            pipeline_id: graph.id().to_string(),
            run_id: ctx.run_id,
            logical_date: ctx.logical_date,
            created_at: Utc::now(),
            ended_at: None,
            state: RunState::Running,
            tasks: graph.nodes().iter().map(|n| n.name().to_string()).collect(),
            instances: graph
                .nodes()
                .iter()
                .map(|n| (n.name().to_string(), TaskInstance::new(n)))
                .collect(),
            execution_order: Vec::new(),
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn logical_date(&self) -> DateTime<Utc> {
        self.logical_date
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state != RunState::Running
    }

    pub fn instance(&self, task: &str) -> Option<&TaskInstance> {
        self.instances.get(task)
    }

    /// Instances in graph declaration order.
    pub fn instances(&self) -> impl Iterator<Item = &TaskInstance> {
        self.tasks.iter().filter_map(|t| self.instances.get(t))
    }

    /// State of `task`, or `Pending` for unknown names.
    pub fn state_of(&self, task: &str) -> TaskState {
        self.instances
            .get(task)
            .map(|i| i.state())
            .unwrap_or(TaskState::Pending)
    }

    /// Tasks in the order they reached a terminal state.
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// The first task that failed on its own (not by upstream propagation).
    pub fn first_failure(&self) -> Option<&TaskInstance> {
        self.execution_order
            .iter()
            .filter_map(|t| self.instances.get(t))
            .find(|i| i.state() == TaskState::Failed)
    }

    pub(crate) fn instance_mut(&mut self, task: &str) -> Option<&mut TaskInstance> {
        self.instances.get_mut(task)
    }

    pub(crate) fn record_terminal(&mut self, task: &str) {
        if self.state_of(task).is_terminal() {
            self.execution_order.push(task.to_string());
        }
    }

    /// Mark every non-terminal instance cancelled.
    pub(crate) fn cancel_remaining(&mut self, now: DateTime<Utc>) {
        for task in &self.tasks {
            if let Some(instance) = self.instances.get_mut(task) {
                if !instance.state().is_terminal() {
                    let attempts = instance.attempt();
                    instance.finish(TaskState::Cancelled, attempts, None, None, now);
                    self.execution_order.push(task.clone());
                }
            }
        }
    }

    pub(crate) fn complete(&mut self, state: RunState, now: DateTime<Utc>) {
        self.state = state;
        self.ended_at = Some(now);
    }

    /// Human-readable summary: overall state, per-task states and the order
    /// in which tasks settled.
    pub fn report(&self) -> String {
        let mut out = format!(
            "run {} of '{}': {}\n",
            self.run_id, self.pipeline_id, self.state
        );
        for instance in self.instances() {
            out.push_str(&format!(
                "  {:<20} {:<16} attempts {}/{}",
                instance.task(),
                instance.state(),
                instance.attempt(),
                instance.max_attempts()
            ));
            if let Some(err) = instance.error() {
                out.push_str(&format!("  error: {err}"));
            }
            out.push('\n');
        }
        out.push_str("execution order:\n");
        for (i, step) in self.execution_order.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, step));
        }
        out
    }
}
