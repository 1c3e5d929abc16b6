//! Deadline reminder sweep.
//!
//! A single process-wide scheduler ticks on a fixed wall-clock interval
//! (12 hours), scans the store for tasks whose deadline falls inside a
//! forward-looking 48-hour window with a non-terminal status, and emails
//! each resolvable assignee one reminder. There is no persisted
//! "already notified" record: a task still inside the window at the next
//! tick is notified again. At-least-once, possibly repeated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::db::DbHandle;
use crate::errors::SweepError;
use crate::mailer::{Mailer, reminder_body, reminder_subject};
use crate::models::TaskStatus;

/// Fixed wall-clock interval between sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Forward-looking due-soon window, in hours.
pub const DUE_SOON_WINDOW_HOURS: i64 = 48;

/// Upper bound on a single reminder dispatch, so one slow delivery cannot
/// stall the whole run.
pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one sweep run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    /// Tasks returned by the due-soon query.
    pub candidates: usize,
    /// Reminders handed to the sink successfully.
    pub dispatched: usize,
    /// Tasks skipped because no assignee email could be resolved.
    pub skipped_no_email: usize,
    /// Dispatches that failed or timed out.
    pub failed: usize,
}

pub struct ReminderSweep {
    db: DbHandle,
    mailer: Arc<dyn Mailer>,
    interval: Duration,
    window: chrono::Duration,
    running: AtomicBool,
    handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ReminderSweep {
    pub fn new(db: DbHandle, mailer: Arc<dyn Mailer>) -> Self {
        Self::with_schedule(
            db,
            mailer,
            SWEEP_INTERVAL,
            chrono::Duration::hours(DUE_SOON_WINDOW_HOURS),
        )
    }

    /// Construct with an explicit interval and window (tests).
    pub fn with_schedule(
        db: DbHandle,
        mailer: Arc<dyn Mailer>,
        interval: Duration,
        window: chrono::Duration,
    ) -> Self {
        Self {
            db,
            mailer,
            interval,
            window,
            running: AtomicBool::new(false),
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Install the periodic schedule. Idempotent: a second call while the
    /// timer is live returns `SweepError::AlreadyRunning` instead of
    /// stacking another timer.
    pub fn start(self: &Arc<Self>) -> Result<(), SweepError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SweepError::AlreadyRunning);
        }

        let sweep = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep.interval);
            // The first tick completes immediately; consume it so runs land
            // on interval boundaries rather than at install time.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match sweep.run_once(Utc::now()).await {
                    Ok(report) => {
                        info!(
                            target: "sweep",
                            candidates = report.candidates,
                            dispatched = report.dispatched,
                            skipped_no_email = report.skipped_no_email,
                            failed = report.failed,
                            "reminder sweep completed"
                        );
                    }
                    // A failed run is logged and dropped; the next tick
                    // tries again. The host process never dies here.
                    Err(e) => error!(target: "sweep", error = %e, "reminder sweep run failed"),
                }
            }
        });

        let mut handle = self
            .handle
            .lock()
            .map_err(|e| SweepError::Other(anyhow::anyhow!("Sweep handle lock poisoned: {}", e)))?;
        *handle = Some(task);
        info!(target: "sweep", interval_secs = self.interval.as_secs(), "reminder sweep scheduled");
        Ok(())
    }

    /// Tear down the schedule. Safe to call when not running.
    pub fn stop(&self) {
        if let Ok(mut handle) = self.handle.lock()
            && let Some(task) = handle.take()
        {
            task.abort();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Execute one sweep run at the given instant.
    ///
    /// Queries tasks with `deadline ∈ [now, now + window]` and a
    /// non-terminal status, then dispatches one reminder per task with a
    /// resolvable assignee email. Per-task failures are isolated: they are
    /// logged and counted, and the run continues. Only a store-query
    /// failure aborts the run.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, SweepError> {
        let window_end = now + self.window;
        let due = self
            .db
            .call(move |db| db.find_tasks_due_between(now, window_end, &TaskStatus::Closed))
            .await
            .map_err(SweepError::QueryFailed)?;

        let mut report = SweepReport {
            candidates: due.len(),
            ..Default::default()
        };

        for item in due {
            let Some(email) = item.assignee_email.as_deref() else {
                debug!(
                    target: "sweep",
                    task_id = item.task.id,
                    "skipping task without resolvable assignee email"
                );
                report.skipped_no_email += 1;
                continue;
            };

            let subject = reminder_subject(&item.task.title);
            let body = reminder_body(
                item.assignee_name.as_deref(),
                &item.task.title,
                &item.task.deadline,
            );

            match tokio::time::timeout(DISPATCH_TIMEOUT, self.mailer.send(email, &subject, &body))
                .await
            {
                Ok(Ok(())) => {
                    debug!(target: "sweep", task_id = item.task.id, to = email, "reminder dispatched");
                    report.dispatched += 1;
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sweep",
                        task_id = item.task.id,
                        to = email,
                        error = %e,
                        "reminder dispatch failed"
                    );
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(
                        target: "sweep",
                        task_id = item.task.id,
                        to = email,
                        timeout_secs = DISPATCH_TIMEOUT.as_secs(),
                        "reminder dispatch timed out"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
