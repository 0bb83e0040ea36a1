mod common;
use crate::common::fakes::{
    FailingAlertSink, PanickingLogSink, RecordingAlertSink, RecordingLogSink,
};
use crate::common::init_tracing;

use std::sync::Arc;

use stagecuter::notifier::NotifyReport;
use stagecuter::{FailureContext, FailureNotifier};

fn context() -> FailureContext {
    FailureContext {
        pipeline_id: "dbt_transform".to_string(),
        run_id: "manual__2024-01-01T00:00:00+00:00".to_string(),
        task_id: "mid_run".to_string(),
        error: "command exited with status 1".to_string(),
    }
}

#[test]
fn log_message_names_pipeline_and_task() {
    assert_eq!(
        context().log_message(),
        "Task failed: dbt_transform.mid_run - command exited with status 1"
    );
}

#[tokio::test]
async fn delivers_to_both_collaborators() {
    let log = Arc::new(RecordingLogSink::default());
    let alert = Arc::new(RecordingAlertSink::default());
    let notifier = FailureNotifier::new(log.clone(), alert.clone());

    let report = notifier.on_task_terminal_failure(&context()).await;

    assert_eq!(
        report,
        NotifyReport {
            logged: true,
            alerted: true
        }
    );
    assert_eq!(log.messages(), vec![context().log_message()]);
    assert_eq!(
        alert.alerts(),
        vec![(
            "dbt_transform".to_string(),
            "mid_run".to_string(),
            "command exited with status 1".to_string()
        )]
    );
}

#[tokio::test]
async fn alert_failure_does_not_suppress_log() {
    init_tracing();
    let log = Arc::new(RecordingLogSink::default());
    let notifier = FailureNotifier::new(log.clone(), Arc::new(FailingAlertSink));

    let report = notifier.on_task_terminal_failure(&context()).await;

    assert!(report.logged);
    assert!(!report.alerted);
    assert_eq!(log.messages().len(), 1);
}

#[tokio::test]
async fn panicking_log_sink_does_not_suppress_alert() {
    init_tracing();
    let alert = Arc::new(RecordingAlertSink::default());
    let notifier = FailureNotifier::default()
        .with_log_sink(Arc::new(PanickingLogSink))
        .with_alert_sink(alert.clone());

    let report = notifier.on_task_terminal_failure(&context()).await;

    assert!(!report.logged);
    assert!(report.alerted);
    assert_eq!(alert.alerts().len(), 1);
}

#[tokio::test]
async fn default_notifier_logs_and_skips_alerting() {
    init_tracing();
    let report = FailureNotifier::default()
        .on_task_terminal_failure(&context())
        .await;
    assert!(report.logged);
    assert!(report.alerted);
}
