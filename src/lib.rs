pub mod cli;
pub mod command;
pub mod config;
pub mod cycle_check;
pub mod executor;
pub mod graph;
pub mod logging;
pub mod notifier;
pub mod pipeline;
pub mod retry;
pub mod run;
pub mod scheduler;
pub mod task;
pub mod trigger;

pub use command::{CommandError, CommandExecutor, CommandOutput, ShellExecutor};
pub use cycle_check::find_cycle;
pub use executor::GraphExecutor;
pub use graph::{Edge, TaskGraph};
pub use notifier::{AlertSink, FailureContext, FailureNotifier, LogSink, NotifyError};
pub use pipeline::{Layer, PipelineSpec, ToolCommand};
pub use retry::{Interrupt, RetryBudget, RetryExecutor, RetryOutcome};
pub use run::{GraphRun, RunContext, RunState, SuccessPolicy, TaskInstance, TaskState};
pub use scheduler::{IntervalClock, OverlapPolicy, RunScheduler, ScheduledRun};
pub use task::TaskNode;
pub use trigger::{Decision, TriggerRule};

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{PipelineConfig, default_config_path, load_and_validate};

/// Problems with the shape of a pipeline, detected before anything runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cycle detected in task graph involving task '{0}'")]
    CycleDetected(String),
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),
    #[error("task '{task}' references unknown task '{missing}'")]
    UnknownTask { task: String, missing: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum StagecuterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("task {task} failed after {attempts} attempt(s), last error: {last_error}")]
    RetryBudgetExhausted {
        task: String,
        attempts: u32,
        last_error: String,
    },
    #[error("run task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, StagecuterError>;

/// Entry point used by `main.rs`: load config, then either print the graph,
/// execute a single manual run, or hand control to the interval scheduler.
pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading pipeline config from '{}'", config_path.display()))?;
    let graph = Arc::new(cfg.pipeline.build_graph()?);

    if args.dry_run {
        print_dry_run(&cfg, &graph);
        return Ok(());
    }

    let executor = Arc::new(
        GraphExecutor::new(Arc::new(ShellExecutor::new()))
            .with_success_policy(cfg.schedule.success_policy),
    );
    let mut scheduler = RunScheduler::new(Arc::clone(&graph), executor, cfg.clock()?)
        .with_overlap(cfg.schedule.overlap);

    // Ctrl-C cancels every in-flight run and stops the interval loop.
    {
        let shutdown = scheduler.shutdown_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        });
    }

    if args.once {
        let run = scheduler.trigger_manual(Utc::now()).wait().await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&run)?);
        } else {
            println!("{}", run.report());
        }
        if run.state() != RunState::Success {
            anyhow::bail!("run {} finished in state {}", run.run_id(), run.state());
        }
        return Ok(());
    }

    scheduler.run().await?;
    Ok(())
}

fn print_dry_run(cfg: &PipelineConfig, graph: &TaskGraph) {
    println!("stagecuter dry-run: pipeline '{}'", graph.id());
    println!("  schedule.interval = {:?}", cfg.schedule.interval);
    println!("  schedule.start = {}", cfg.schedule.start.to_rfc3339());
    println!("  schedule.overlap = {:?}", cfg.schedule.overlap);
    println!("  schedule.success_policy = {:?}", cfg.schedule.success_policy);
    println!();

    println!("tasks ({}):", graph.len());
    for node in graph.topological_order() {
        let budget = node.retry_budget();
        println!("  - {}", node.name());
        println!("      cmd: {}", node.command());
        println!(
            "      attempts: {} (delay {:?})",
            budget.max_attempts(), budget.delay()
        );
        println!("      trigger_rule: {}", node.trigger_rule());
        if !node.dependencies().is_empty() {
            println!("      after: {:?}", node.dependencies());
        }
    }
    println!();
    println!("{}", graph.render());

    debug!("dry-run complete (no execution)");
}
