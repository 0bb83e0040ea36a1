use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times a task may invoke its command, and how long to wait between
/// invocations. The delay is fixed; there is no backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BudgetFields")]
pub struct RetryBudget {
    max_attempts: u32,
    delay: Duration,
}

/// Wire form of [`RetryBudget`]; deserialized values go through the clamp.
#[derive(Deserialize)]
struct BudgetFields {
    max_attempts: u32,
    delay: Duration,
}

impl From<BudgetFields> for RetryBudget {
    fn from(fields: BudgetFields) -> Self {
        RetryBudget::new(fields.max_attempts, fields.delay)
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::from_secs(300),
        }
    }
}

impl RetryBudget {
    /// A budget of `max_attempts` total invocations. Zero is raised to one:
    /// every task that is allowed to run is invoked at least once.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A budget expressed as "first attempt plus `retries` retries".
    pub fn from_retries(retries: u32, delay: Duration) -> Self {
        Self::new(retries.saturating_add(1), delay)
    }

    /// Total invocations allowed, always at least one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn retries(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }
}

/// Errors that may signal the work was interrupted rather than failed.
/// Interrupted work is never retried.
pub trait Interrupt {
    fn is_cancelled(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
    Cancelled { attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of times the operation was actually invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

pub struct RetryExecutor {
    budget: RetryBudget,
}

impl RetryExecutor {
    pub fn new(budget: RetryBudget) -> Self {
        Self { budget }
    }

    /// Run `operation` until it succeeds, the budget is spent, or `ctx` is
    /// cancelled. The closure receives the 1-based attempt number.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        ctx: &CancellationToken,
        task_name: &str,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Interrupt + Display,
    {
        let max_attempts = self.budget.max_attempts;
        let mut attempt = 0;

        loop {
            if ctx.is_cancelled() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };

            if error.is_cancelled() {
                debug!(task = task_name, attempt, "attempt interrupted by cancellation");
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            if attempt >= max_attempts {
                return RetryOutcome::Exhausted {
                    last_error: error,
                    attempts: attempt,
                };
            }

            warn!(
                task = task_name,
                attempt,
                max_attempts,
                delay = ?self.budget.delay,
                error = %error,
                "attempt failed; retrying after delay"
            );

            tokio::select! {
                _ = ctx.cancelled() => {
                    debug!(task = task_name, attempt, "cancelled during retry wait");
                    return RetryOutcome::Cancelled { attempts: attempt };
                }
                _ = sleep(self.budget.delay) => {}
            }
        }
    }
}
