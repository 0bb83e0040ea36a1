//! Failure notification.
//!
//! When a task exhausts its retry budget the executor hands a
//! [`FailureContext`] to the [`FailureNotifier`], which forwards it to a
//! logging collaborator and an alerting collaborator. Both deliveries are
//! best-effort and independent of each other; errors and panics from either
//! are reported on the `stagecuter::notifier::fallback` target and never reach
//! the caller.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// What went wrong, and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureContext {
    pub pipeline_id: String,
    pub run_id: String,
    pub task_id: String,
    pub error: String,
}

impl FailureContext {
    pub fn log_message(&self) -> String {
        format!(
            "Task failed: {}.{} - {}",
            self.pipeline_id, self.task_id, self.error
        )
    }
}

/// External alert channel (chat, email, pager).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert_pipeline_failure(
        &self,
        pipeline_id: &str,
        task_id: &str,
        error_message: &str,
    ) -> Result<(), NotifyError>;
}

/// External error log.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log_error(&self, message: &str) -> Result<(), NotifyError>;
}

/// Alert sink used when no alerting collaborator is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopAlertSink;

#[async_trait]
impl AlertSink for NoopAlertSink {
    async fn alert_pipeline_failure(
        &self,
        pipeline_id: &str,
        task_id: &str,
        _error_message: &str,
    ) -> Result<(), NotifyError> {
        debug!(pipeline = pipeline_id, task = task_id, "no alert sink configured; skipping external alert");
        Ok(())
    }
}

/// Writes failures to the process log.
#[derive(Debug, Clone, Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn log_error(&self, message: &str) -> Result<(), NotifyError> {
        error!(target: "stagecuter::failures", "{message}");
        Ok(())
    }
}

/// Which deliveries went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotifyReport {
    pub logged: bool,
    pub alerted: bool,
}

#[derive(Clone)]
pub struct FailureNotifier {
    log: Arc<dyn LogSink>,
    alert: Arc<dyn AlertSink>,
}

impl Default for FailureNotifier {
    fn default() -> Self {
        Self {
            log: Arc::new(TracingLogSink),
            alert: Arc::new(NoopAlertSink),
        }
    }
}

impl FailureNotifier {
    pub fn new(log: Arc<dyn LogSink>, alert: Arc<dyn AlertSink>) -> Self {
        Self { log, alert }
    }

    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn with_alert_sink(mut self, alert: Arc<dyn AlertSink>) -> Self {
        self.alert = alert;
        self
    }

    /// Forward a terminal task failure to both collaborators.
    pub async fn on_task_terminal_failure(&self, ctx: &FailureContext) -> NotifyReport {
        let message = ctx.log_message();
        let logged = deliver("log", ctx, self.log.log_error(&message)).await;
        let alerted = deliver(
            "alert",
            ctx,
            self.alert
                .alert_pipeline_failure(&ctx.pipeline_id, &ctx.task_id, &ctx.error),
        )
        .await;

        NotifyReport { logged, alerted }
    }
}

async fn deliver<F>(channel: &'static str, ctx: &FailureContext, fut: F) -> bool
where
    F: Future<Output = Result<(), NotifyError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(
                target: "stagecuter::notifier::fallback",
                channel,
                pipeline = %ctx.pipeline_id,
                run_id = %ctx.run_id,
                task = %ctx.task_id,
                error = %e,
                failure = %ctx.error,
                "failed to deliver failure notification"
            );
            false
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(
                target: "stagecuter::notifier::fallback",
                channel,
                pipeline = %ctx.pipeline_id,
                run_id = %ctx.run_id,
                task = %ctx.task_id,
                panic = %reason,
                failure = %ctx.error,
                "notification collaborator panicked"
            );
            false
        }
    }
}
