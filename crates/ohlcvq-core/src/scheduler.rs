//! Hourly trigger for the ingestion tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ValidationError;
use crate::pipeline::{Ingester, TickOutcome};
use crate::UtcDateTime;

/// Fires once per hour at `second` seconds past the hour boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlySchedule {
    second: u8,
    misfire_grace: Duration,
}

impl Default for HourlySchedule {
    fn default() -> Self {
        Self {
            second: 1,
            misfire_grace: Duration::from_secs(600),
        }
    }
}

impl HourlySchedule {
    pub fn new(second: u8, misfire_grace: Duration) -> Result<Self, ValidationError> {
        if second > 59 {
            return Err(ValidationError::ScheduleSecondOutOfRange { value: second });
        }
        Ok(Self {
            second,
            misfire_grace,
        })
    }

    pub fn misfire_grace(&self) -> Duration {
        self.misfire_grace
    }

    /// First fire time strictly after `now`.
    pub fn next_fire(&self, now: UtcDateTime) -> UtcDateTime {
        let now = now.into_inner();
        let into_hour = time::Duration::minutes(i64::from(now.minute()))
            + time::Duration::seconds(i64::from(now.second()))
            + time::Duration::nanoseconds(i64::from(now.nanosecond()));
        let candidate = now - into_hour + time::Duration::seconds(i64::from(self.second));
        let next = if candidate <= now {
            candidate + time::Duration::HOUR
        } else {
            candidate
        };

        UtcDateTime::from_offset_datetime(next).unwrap_or_else(|_| UtcDateTime::now())
    }

    /// Whether a trigger scheduled for `scheduled` may still run at `now`.
    pub fn accepts(&self, scheduled: UtcDateTime, now: UtcDateTime) -> bool {
        let lateness = now.into_inner() - scheduled.into_inner();
        Duration::try_from(lateness).map_or(true, |late| late <= self.misfire_grace)
    }
}

/// Background loop that runs an [`Ingester`] on an [`HourlySchedule`].
pub struct Scheduler;

impl Scheduler {
    /// Spawn the timer loop on the current tokio runtime.
    pub fn start(ingester: Arc<Ingester>, schedule: HourlySchedule) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(ingester, schedule, shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }
}

/// Owner handle for a running [`Scheduler`].
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the loop to exit. A tick already running
    /// finishes first.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(error) = self.task.await {
            tracing::error!(%error, "scheduler task ended abnormally");
        }
    }
}

async fn run_loop(
    ingester: Arc<Ingester>,
    schedule: HourlySchedule,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        second = schedule.second,
        misfire_grace_secs = schedule.misfire_grace.as_secs(),
        "scheduler started"
    );

    let mut last_scheduled: Option<UtcDateTime> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }

        // The timer may wake a hair before the wall clock reaches the target;
        // never schedule the same slot twice.
        let now = match last_scheduled {
            Some(last) => UtcDateTime::now().max(last),
            None => UtcDateTime::now(),
        };
        let scheduled = schedule.next_fire(now);
        let wait = Duration::try_from(scheduled.into_inner() - now.into_inner())
            .unwrap_or(Duration::ZERO);
        tracing::debug!(next_fire = %scheduled, wait_secs = wait.as_secs(), "waiting for next tick");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        last_scheduled = Some(scheduled);
        let fired_at = UtcDateTime::now().max(scheduled);
        if !schedule.accepts(scheduled, fired_at) {
            tracing::warn!(
                scheduled = %scheduled,
                fired_at = %fired_at,
                "trigger missed its grace window; skipping tick"
            );
            continue;
        }

        if let TickOutcome::AlreadyRunning = ingester.run_tick_at(fired_at).await {
            tracing::warn!(scheduled = %scheduled, "scheduled tick overlapped a running tick");
        }
    }

    tracing::info!("scheduler stopped");
}
