use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use stagecuter::notifier::{AlertSink, LogSink, NotifyError};
use stagecuter::{CommandError, CommandExecutor, CommandOutput};

/// A command executor that:
/// - records every command it is asked to run
/// - succeeds by default
/// - fails the first N invocations of selected commands, or all of them.
#[derive(Default)]
pub struct ScriptedExecutor {
    failures_left: Mutex<HashMap<String, usize>>,
    always_fail: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_times(self, command: &str, n: usize) -> Self {
        self.failures_left
            .lock()
            .unwrap()
            .insert(command.to_string(), n);
        self
    }

    pub fn always_fail(mut self, command: &str) -> Self {
        self.always_fail.insert(command.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(
        &self,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        self.calls.lock().unwrap().push(command.to_string());

        let fail = self.always_fail.contains(command) || {
            let mut left = self.failures_left.lock().unwrap();
            match left.get_mut(command) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        };

        if fail {
            Err(CommandError::Exit {
                code: Some(1),
                output: CommandOutput {
                    stdout: String::new(),
                    stderr: format!("{command}: boom"),
                },
            })
        } else {
            Ok(CommandOutput {
                stdout: format!("{command}: ok"),
                stderr: String::new(),
            })
        }
    }
}

/// A command executor whose gated command blocks until the test releases it.
///
/// Tracks how many commands are in flight at once.
pub struct GatedExecutor {
    gated: String,
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl GatedExecutor {
    pub fn new(gated: &str) -> Self {
        Self {
            gated: gated.to_string(),
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Let one blocked (or future) invocation of the gated command finish.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for GatedExecutor {
    async fn run(
        &self,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        self.started.lock().unwrap().push(command.to_string());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let result = if command == self.gated {
            tokio::select! {
                permit = self.gate.acquire() => {
                    permit.expect("gate closed").forget();
                    Ok(CommandOutput::default())
                }
                _ = cancel.cancelled() => Err(CommandError::Cancelled),
            }
        } else {
            Ok(CommandOutput::default())
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Succeeds on every command, but fires the run's cancellation token while
/// running `trigger`, as a Ctrl-C landing mid-command would.
pub struct CancelDuringExecutor {
    trigger: String,
}

impl CancelDuringExecutor {
    pub fn new(trigger: &str) -> Self {
        Self {
            trigger: trigger.to_string(),
        }
    }
}

#[async_trait]
impl CommandExecutor for CancelDuringExecutor {
    async fn run(
        &self,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        if command == self.trigger {
            cancel.cancel();
        }
        Ok(CommandOutput::default())
    }
}

/// Records alerts as `(pipeline_id, task_id, error_message)`.
#[derive(Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<(String, String, String)>>,
}

impl RecordingAlertSink {
    pub fn alerts(&self) -> Vec<(String, String, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn alert_pipeline_failure(
        &self,
        pipeline_id: &str,
        task_id: &str,
        error_message: &str,
    ) -> Result<(), NotifyError> {
        self.alerts.lock().unwrap().push((
            pipeline_id.to_string(),
            task_id.to_string(),
            error_message.to_string(),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLogSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingLogSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogSink for RecordingLogSink {
    async fn log_error(&self, message: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub struct FailingAlertSink;

#[async_trait]
impl AlertSink for FailingAlertSink {
    async fn alert_pipeline_failure(
        &self,
        _pipeline_id: &str,
        _task_id: &str,
        _error_message: &str,
    ) -> Result<(), NotifyError> {
        Err(NotifyError::Delivery("webhook returned 500".to_string()))
    }
}

pub struct PanickingLogSink;

#[async_trait]
impl LogSink for PanickingLogSink {
    async fn log_error(&self, _message: &str) -> Result<(), NotifyError> {
        panic!("log backend exploded");
    }
}

/// Convenience: wrap in `Arc` and also return the trait-object view.
pub fn shared<T: CommandExecutor + 'static>(exec: T) -> (Arc<T>, Arc<dyn CommandExecutor>) {
    let exec = Arc::new(exec);
    let dyn_exec: Arc<dyn CommandExecutor> = exec.clone();
    (exec, dyn_exec)
}
