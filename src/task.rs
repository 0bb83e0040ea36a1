use serde::{Deserialize, Serialize};

use crate::{RetryBudget, TriggerRule};

/// A single step of the pipeline: what to run, how often to try, and when it
/// is allowed to run at all.
///
/// Nodes are plain data. Once handed to [`crate::TaskGraph::build`] they are
/// never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskNode {
    name: String,
    command: String,
    #[serde(default)]
    retry: RetryBudget,
    #[serde(default)]
    trigger_rule: TriggerRule,
    #[serde(default)]
    after: Vec<String>,
}

impl TaskNode {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            retry: RetryBudget::default(),
            trigger_rule: TriggerRule::default(),
            after: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryBudget) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }

    /// Declare that this task depends on `dep`.
    pub fn after(mut self, dep: impl Into<String>) -> Self {
        self.add_dependency(dep.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque command handed to the [`crate::CommandExecutor`].
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn retry_budget(&self) -> RetryBudget {
        self.retry
    }

    pub fn trigger_rule(&self) -> TriggerRule {
        self.trigger_rule
    }

    pub fn dependencies(&self) -> &[String] {
        &self.after
    }

    pub(crate) fn add_dependency(&mut self, dep: String) {
        if !self.after.contains(&dep) {
            self.after.push(dep);
        }
    }
}
