//! Background sweeps of pending records.
//!
//! [`SyncOrchestrator::spawn`] starts a task that sweeps on a fixed
//! interval (only while online with pending work), whenever connectivity
//! comes back, and on request.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::db::RecordRepository;
use crate::engine::{AttemptOutcome, SyncEngine};
use crate::error::{Error, Result};
use crate::models::{EntityKind, SyncStatus};

/// Tally of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records that reached the remote service
    pub attempted: usize,
    pub synced: usize,
    /// Failed attempts, whether or not the budget ran out, plus records
    /// given up on because a reference can never be created
    pub failed: usize,
    /// Records held back behind an unsynced reference
    pub deferred: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: AttemptOutcome) {
        if outcome.made_call() {
            self.attempted += 1;
        }
        match outcome {
            AttemptOutcome::Synced => self.synced += 1,
            AttemptOutcome::Retrying | AttemptOutcome::Failed | AttemptOutcome::Stranded => {
                self.failed += 1;
            }
            AttemptOutcome::Deferred => self.deferred += 1,
            AttemptOutcome::Superseded | AttemptOutcome::Skipped => {}
        }
    }
}

impl SyncEngine {
    /// Attempt every retry-eligible pending record once.
    ///
    /// Kinds are swept tier by tier so parents are created before the
    /// records pointing at them; records within a tier run concurrently.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if !self.connectivity().is_available() {
            tracing::debug!("Skipping sweep while offline");
            return Ok(report);
        }

        let tiers: BTreeSet<u8> = EntityKind::ALL.iter().map(|kind| kind.tier()).collect();
        for tier in tiers {
            let policy = &self.config().retry;
            let now = self.now();
            let due = self.database().read(|repo| {
                let mut due = Vec::new();
                for kind in EntityKind::ALL.into_iter().filter(|kind| kind.tier() == tier) {
                    for record in repo.query_by_status(kind, &SyncStatus::RETRYABLE)? {
                        if policy.is_eligible(&record.sync, now) {
                            due.push((kind, record.id));
                        }
                    }
                }
                Ok(due)
            })?;

            let mut workers = JoinSet::new();
            for (kind, id) in due {
                let engine = self.clone();
                workers.spawn(async move { engine.drive(kind, id).await });
            }
            while let Some(joined) = workers.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => report.record(outcome),
                    Ok(Err(error)) => tracing::error!("Sweep worker failed: {error}"),
                    Err(error) => tracing::error!("Sweep worker aborted: {error}"),
                }
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                "Sweep finished: {} attempted, {} synced, {} failed, {} deferred",
                report.attempted,
                report.synced,
                report.failed,
                report.deferred
            );
        }
        Ok(report)
    }

    /// Give every `Failed` record a fresh retry budget, then sweep.
    ///
    /// Each record returns to the pending variant it stalled in, so a
    /// failed delete is retried as a delete.
    pub async fn retry_failed(&self) -> Result<SweepReport> {
        let reset = self.database().write(|repo| {
            let mut reset = 0;
            for kind in EntityKind::ALL {
                for mut record in repo.query_by_status(kind, &[SyncStatus::Failed])? {
                    if record.sync.retry_reset() {
                        repo.upsert(&record)?;
                        reset += 1;
                    }
                }
            }
            Ok(reset)
        })?;
        tracing::info!("Reset {reset} failed records for retry");
        self.sweep().await
    }
}

enum Command {
    SweepNow(oneshot::Sender<Result<SweepReport>>),
    Shutdown,
}

/// Runs sweeps in the background
pub struct SyncOrchestrator {
    engine: SyncEngine,
    commands: mpsc::Receiver<Command>,
    connectivity: watch::Receiver<bool>,
}

/// Control handle for a spawned orchestrator
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    engine: SyncEngine,
}

impl SyncOrchestrator {
    /// Start the background loop on the current runtime.
    pub fn spawn(engine: SyncEngine) -> OrchestratorHandle {
        let (commands_tx, commands) = mpsc::channel(8);
        let orchestrator = Self {
            connectivity: engine.connectivity().subscribe(),
            engine: engine.clone(),
            commands,
        };
        OrchestratorHandle {
            commands: commands_tx,
            task: tokio::spawn(orchestrator.run()),
            engine,
        }
    }

    async fn run(mut self) {
        let mut online = *self.connectivity.borrow_and_update();
        let mut ticker = self.engine.config().sweep_interval.map(interval);
        tracing::info!("Sync orchestrator started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SweepNow(reply)) => {
                        // Caller may have given up waiting
                        let _ = reply.send(self.engine.sweep().await);
                    }
                    Some(Command::Shutdown) | None => break,
                },
                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let available = *self.connectivity.borrow_and_update();
                    if available && !online {
                        tracing::info!("Connectivity restored, sweeping");
                        self.sweep_logged().await;
                    }
                    online = available;
                }
                () = tick(ticker.as_mut()) => {
                    if self.has_due_work() {
                        self.sweep_logged().await;
                    }
                }
            }
        }

        tracing::info!("Sync orchestrator stopped");
    }

    fn has_due_work(&self) -> bool {
        if !self.engine.connectivity().is_available() {
            return false;
        }
        match self.engine.pending_count() {
            Ok(pending) => pending > 0,
            Err(error) => {
                tracing::warn!("Failed to count pending records: {error}");
                false
            }
        }
    }

    async fn sweep_logged(&self) {
        if let Err(error) = self.engine.sweep().await {
            tracing::warn!("Sweep failed: {error}");
        }
    }
}

fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl OrchestratorHandle {
    /// Sweep immediately and wait for the result.
    pub async fn sweep_now(&self) -> Result<SweepReport> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SweepNow(reply))
            .await
            .map_err(|_| Error::OrchestratorStopped)?;
        response.await.map_err(|_| Error::OrchestratorStopped)?
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop and wait for in-flight reconciliation to drain.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        if let Err(error) = self.task.await {
            tracing::error!("Sync orchestrator task failed: {error}");
        }
        self.engine.wait_idle().await;
    }
}
