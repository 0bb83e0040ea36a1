//! Interval-driven run creation.
//!
//! [`IntervalClock`] is the pure part: it maps wall-clock time onto interval
//! boundaries and hands out each boundary at most once, never catching up on
//! boundaries that passed while nobody was asking. [`RunScheduler`] turns those
//! boundaries into spawned [`GraphRun`]s, serialising them unless configured
//! otherwise.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ConfigError, GraphExecutor, GraphRun, Result, RunContext, TaskGraph};

/// Whether a new run may start while an earlier one is still going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlapPolicy {
    /// A new run waits until the previous run is terminal.
    #[default]
    Serialize,
    /// Runs execute concurrently.
    Allow,
}

/// Finished runs kept by a [`RunScheduler`] unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Longest accepted interval between runs: one year.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct IntervalClock {
    anchor: DateTime<Utc>,
    interval: TimeDelta,
    last_boundary: Option<DateTime<Utc>>,
}

impl IntervalClock {
    /// Boundaries fall at `anchor + k * interval` for `k >= 0`.
    pub fn new(anchor: DateTime<Utc>, interval: Duration) -> std::result::Result<Self, ConfigError> {
        if interval > MAX_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "schedule interval must be at most {}s (got {}s)",
                MAX_INTERVAL.as_secs(),
                interval.as_secs()
            )));
        }
        let interval = TimeDelta::from_std(interval)
            .map_err(|e| ConfigError::Invalid(format!("schedule interval out of range: {e}")))?;
        if interval.num_milliseconds() <= 0 {
            return Err(ConfigError::Invalid(
                "schedule interval must be at least one millisecond".to_string(),
            ));
        }
        Ok(Self {
            anchor,
            interval,
            last_boundary: None,
        })
    }

    /// Continue from a boundary that was already run (e.g. before a restart).
    pub fn resume_from(mut self, last_boundary: DateTime<Utc>) -> Self {
        self.last_boundary = Some(last_boundary);
        self
    }

    pub fn last_boundary(&self) -> Option<DateTime<Utc>> {
        self.last_boundary
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Most recent boundary at or before `now`, if the schedule has started.
    pub fn boundary_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if now < self.anchor {
            return None;
        }
        let step = self.interval.num_milliseconds();
        let elapsed = (now - self.anchor).num_milliseconds();
        Some(self.anchor + TimeDelta::milliseconds((elapsed / step) * step))
    }

    /// First boundary strictly after `now`, or `None` if it lies beyond the
    /// representable date range.
    pub fn next_boundary_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.boundary_at(now) {
            Some(b) => b.checked_add_signed(self.interval),
            None => Some(self.anchor),
        }
    }

    /// The boundary to run for at `now`, if it has not been handed out yet.
    ///
    /// Only the latest boundary is ever returned; boundaries between the last
    /// handed-out one and the latest are dropped.
    pub fn due(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let boundary = self.boundary_at(now)?;
        if let Some(last) = self.last_boundary {
            if boundary <= last {
                return None;
            }
            let missed = (boundary - last).num_milliseconds() / self.interval.num_milliseconds() - 1;
            if missed > 0 {
                info!(
                    missed,
                    last = %last.to_rfc3339(),
                    boundary = %boundary.to_rfc3339(),
                    "skipping missed intervals (no catch-up)"
                );
            }
        }
        self.last_boundary = Some(boundary);
        Some(boundary)
    }
}

/// Handle to a spawned graph run.
pub struct ScheduledRun {
    run_id: String,
    logical_date: DateTime<Utc>,
    cancel: CancellationToken,
    handle: JoinHandle<GraphRun>,
}

impl ScheduledRun {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn logical_date(&self) -> DateTime<Utc> {
        self.logical_date
    }

    /// Cancel this run only. In-flight commands are killed and pending
    /// tasks end up `cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<GraphRun> {
        Ok(self.handle.await?)
    }
}

pub struct RunScheduler {
    graph: Arc<TaskGraph>,
    executor: Arc<GraphExecutor>,
    clock: IntervalClock,
    overlap: OverlapPolicy,
    shutdown: CancellationToken,
    previous: Option<oneshot::Receiver<()>>,
    history: Arc<RwLock<VecDeque<GraphRun>>>,
    history_limit: usize,
}

impl RunScheduler {
    pub fn new(graph: Arc<TaskGraph>, executor: Arc<GraphExecutor>, clock: IntervalClock) -> Self {
        Self {
            graph,
            executor,
            clock,
            overlap: OverlapPolicy::default(),
            shutdown: CancellationToken::new(),
            previous: None,
            history: Arc::new(RwLock::new(VecDeque::new())),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Cancelling this token stops [`RunScheduler::run`] and every run it
    /// spawned.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn clock(&self) -> &IntervalClock {
        &self.clock
    }

    /// Keep at most `limit` finished runs; older ones are dropped first.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// The most recent terminal runs, oldest first.
    pub async fn history(&self) -> Vec<GraphRun> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Create the run for the current interval boundary, if there is one that
    /// has not been run yet.
    pub fn on_interval_elapsed(&mut self, now: DateTime<Utc>) -> Option<ScheduledRun> {
        let boundary = self.clock.due(now)?;
        Some(self.launch(RunContext::scheduled(boundary)))
    }

    /// Create a run outside the interval schedule. Subject to the same
    /// overlap policy as scheduled runs.
    pub fn trigger_manual(&mut self, now: DateTime<Utc>) -> ScheduledRun {
        self.launch(RunContext::manual(now))
    }

    fn launch(&mut self, ctx: RunContext) -> ScheduledRun {
        let run_id = ctx.run_id.clone();
        let logical_date = ctx.logical_date;
        let cancel = self.shutdown.child_token();

        let wait_for = match self.overlap {
            OverlapPolicy::Serialize => {
                let (done_tx, done_rx) = oneshot::channel::<()>();
                Some((self.previous.replace(done_rx), done_tx))
            }
            OverlapPolicy::Allow => None,
        };

        info!(run_id = %run_id, overlap = ?self.overlap, "graph run scheduled");

        let graph = Arc::clone(&self.graph);
        let executor = Arc::clone(&self.executor);
        let history = Arc::clone(&self.history);
        let history_limit = self.history_limit;
        let run_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let done_tx = match wait_for {
                Some((previous, done_tx)) => {
                    if let Some(previous) = previous {
                        debug!(run_id = %ctx.run_id, "waiting for previous run to finish");
                        tokio::select! {
                            // An error means the previous run went away without
                            // signalling; it is not running either way.
                            _ = previous => {}
                            _ = run_cancel.cancelled() => {}
                        }
                    }
                    Some(done_tx)
                }
                None => None,
            };

            let run = executor.execute(&graph, ctx, run_cancel).await;
            {
                let mut history = history.write().await;
                history.push_back(run.clone());
                while history.len() > history_limit {
                    history.pop_front();
                }
            }

            if let Some(done_tx) = done_tx {
                let _ = done_tx.send(());
            }
            run
        });

        ScheduledRun {
            run_id,
            logical_date,
            cancel,
            handle,
        }
    }

    /// Trigger a run at every interval boundary until the shutdown token is
    /// cancelled, then wait for in-flight runs to settle.
    ///
    /// The most recent boundary is run immediately on start; earlier
    /// boundaries are never backfilled.
    pub async fn run(mut self) -> Result<()> {
        let mut in_flight: Vec<ScheduledRun> = Vec::new();

        loop {
            let now = Utc::now();
            if let Some(run) = self.on_interval_elapsed(now) {
                in_flight.push(run);
            }
            in_flight.retain(|r| !r.is_finished());

            let Some(next) = self.clock.next_boundary_after(now) else {
                warn!("no further interval boundary is representable; waiting for shutdown");
                self.shutdown.cancelled().await;
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next.to_rfc3339(), ?wait, "sleeping until next interval boundary");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(in_flight = in_flight.len(), "scheduler stopping; waiting for in-flight runs");
        for run in in_flight {
            let run_id = run.run_id().to_string();
            match run.wait().await {
                Ok(finished) => info!(run_id = %run_id, state = %finished.state(), "run settled"),
                Err(e) => warn!(run_id = %run_id, error = %e, "run task did not complete cleanly"),
            }
        }
        Ok(())
    }
}
