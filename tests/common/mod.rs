#![allow(dead_code)]

pub mod fakes;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use stagecuter::PipelineSpec;
use stagecuter::pipeline::StepKind;
use stagecuter::RetryBudget;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Logs are captured per test and only shown for failures unless run with
/// `-- --nocapture`. Enable levels with e.g. `RUST_LOG=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// The standard pipeline with a short command prefix and no retry delays.
pub fn test_pipeline() -> PipelineSpec {
    let mut spec = PipelineSpec::default().with_command_prefix("dbt");
    for kind in [StepKind::Run, StepKind::Test, StepKind::ProjectTest, StepKind::Docs] {
        let budget = spec.retries.for_kind(kind);
        spec = spec.with_budget(kind, RetryBudget::new(budget.max_attempts(), Duration::ZERO));
    }
    spec
}
