use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{TaskNode, TaskState};

/// Policy deciding whether a task runs once all of its upstream tasks are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerRule {
    /// Run only if every upstream task succeeded.
    #[default]
    #[serde(rename = "all-upstream-succeeded")]
    AllSuccess,
    /// Run whatever the upstream outcome was.
    #[serde(rename = "always-run")]
    AlwaysRun,
    /// Run unless an upstream task failed; skipped upstream tasks are fine.
    #[serde(rename = "none-failed")]
    NoneFailed,
    /// Run only if every upstream task failed, otherwise skip. Meant for
    /// cleanup steps that only make sense after a failure.
    #[serde(rename = "all-upstream-failed")]
    AllFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip,
    UpstreamFailed,
}

impl TriggerRule {
    /// Decide what to do with a task given its upstream terminal states.
    ///
    /// An empty upstream set satisfies every rule.
    pub fn decide(&self, upstream: &[TaskState]) -> Decision {
        debug_assert!(
            upstream.iter().all(|s| s.is_terminal()),
            "trigger rule evaluated before upstream tasks were terminal"
        );

        match self {
            TriggerRule::AllSuccess => {
                if upstream.iter().all(|s| *s == TaskState::Success) {
                    Decision::Run
                } else {
                    Decision::UpstreamFailed
                }
            }
            TriggerRule::AlwaysRun => Decision::Run,
            TriggerRule::NoneFailed => {
                if upstream.iter().any(|s| s.is_failure()) {
                    Decision::UpstreamFailed
                } else {
                    Decision::Run
                }
            }
            TriggerRule::AllFailed => {
                if upstream.iter().all(|s| s.is_failure()) {
                    Decision::Run
                } else {
                    Decision::Skip
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerRule::AllSuccess => "all-upstream-succeeded",
            TriggerRule::AlwaysRun => "always-run",
            TriggerRule::NoneFailed => "none-failed",
            TriggerRule::AllFailed => "all-upstream-failed",
        }
    }
}

/// Convenience form of [`TriggerRule::decide`] using the node's own rule.
pub fn decide(node: &TaskNode, upstream_states: &[TaskState]) -> Decision {
    node.trigger_rule().decide(upstream_states)
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "all-upstream-succeeded" | "all-success" => Ok(TriggerRule::AllSuccess),
            "always-run" | "always" => Ok(TriggerRule::AlwaysRun),
            "none-failed" => Ok(TriggerRule::NoneFailed),
            "all-upstream-failed" | "all-failed" => Ok(TriggerRule::AllFailed),
            other => Err(format!("invalid trigger rule: {other}")),
        }
    }
}
