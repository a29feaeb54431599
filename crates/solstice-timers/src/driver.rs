//! Segmented timer driver.
//!
//! A driver owns one schedule and one callback. It waits for each occurrence
//! in segments no longer than `max_segment`, invokes the callback, records
//! status and repeats until stopped.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::invoke::{FaultSink, Invoker, TimerFault, TimerHandler, TimerInfo};
use crate::monitor::ScheduleMonitor;
use crate::{Clock, Schedule, ScheduleId, ScheduleStatus, SystemClock, TimerError};

/// Longest single wait: 24 days, just under the range of a signed 32-bit
/// millisecond timer.
pub const DEFAULT_MAX_SEGMENT: StdDuration = StdDuration::from_secs(24 * 24 * 60 * 60);

/// Lifecycle of a [`TimerDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Built, not yet started.
    Created,
    /// Start requested; past-due handling in progress.
    Started,
    /// Waiting for or firing occurrences.
    Running,
    /// Stopped; no further callbacks.
    Stopped,
    /// Released. Every further lifecycle call fails.
    Disposed,
}

/// Per-timer behavior switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerOptions {
    /// Longest single wait; longer delays are split.
    pub max_segment: StdDuration,
    /// Invoke once at start even when nothing was missed.
    pub run_on_startup: bool,
    /// Track status in the monitor. Frequent schedules skip tracking
    /// regardless.
    pub use_monitor: bool,
}

impl Default for TimerOptions {
    fn default() -> Self {
        Self {
            max_segment: DEFAULT_MAX_SEGMENT,
            run_on_startup: false,
            use_monitor: true,
        }
    }
}

/// Splits a delay into waits of at most `max`, the last one carrying the
/// remainder. A zero `max` yields the whole delay at once.
#[derive(Debug, Clone)]
pub struct Segments {
    remaining: StdDuration,
    max: StdDuration,
}

impl Segments {
    pub fn new(total: StdDuration, max: StdDuration) -> Self {
        Self {
            remaining: total,
            max,
        }
    }
}

impl Iterator for Segments {
    type Item = StdDuration;

    fn next(&mut self) -> Option<StdDuration> {
        if self.remaining.is_zero() {
            return None;
        }
        let segment = if self.max.is_zero() {
            self.remaining
        } else {
            self.remaining.min(self.max)
        };
        self.remaining -= segment;
        Some(segment)
    }
}

/// Drives one schedule: past-due replay at start, then wait, invoke, persist.
pub struct TimerDriver {
    id: ScheduleId,
    schedule: Arc<Schedule>,
    invoker: Invoker,
    options: TimerOptions,
    monitor: Option<Arc<dyn ScheduleMonitor>>,
    clock: Arc<dyn Clock>,
    state: Arc<watch::Sender<DriverState>>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TimerDriver {
    pub fn new(
        id: ScheduleId,
        schedule: Schedule,
        handler: impl TimerHandler,
        options: TimerOptions,
    ) -> Self {
        let (state, _) = watch::channel(DriverState::Created);
        let (cancel, _) = watch::channel(false);
        Self {
            invoker: Invoker::new(id.clone(), Arc::new(handler)),
            id,
            schedule: Arc::new(schedule),
            options,
            monitor: None,
            clock: Arc::new(SystemClock),
            state: Arc::new(state),
            cancel,
            task: None,
        }
    }

    /// Record status in `monitor` (subject to [`TimerOptions::use_monitor`]).
    pub fn with_monitor(mut self, monitor: Arc<dyn ScheduleMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Deliver recovered failures to `sink` as well as the log.
    pub fn with_fault_sink(mut self, sink: FaultSink) -> Self {
        self.invoker.set_fault_sink(sink);
        self
    }

    pub fn id(&self) -> &ScheduleId {
        &self.id
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn state(&self) -> DriverState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// Run the past-due check, replay a missed occurrence if needed, then
    /// start waiting for the next occurrence in the background.
    ///
    /// A status store failure here aborts the start and leaves the driver in
    /// `Created`.
    #[tracing::instrument(skip(self), fields(schedule_id = %self.id))]
    pub async fn start(&mut self) -> Result<(), TimerError> {
        match self.state() {
            DriverState::Created => {}
            DriverState::Disposed => return Err(TimerError::Disposed(self.id.clone())),
            state => {
                return Err(TimerError::InvalidState {
                    id: self.id.clone(),
                    state,
                    operation: "start",
                });
            }
        }
        self.state.send_replace(DriverState::Started);

        let now = self.clock.now();
        info!(schedule = %self.schedule, "starting timer");
        debug!("{}", self.schedule.format_next_occurrences(5, now));

        let monitor = self.active_monitor();
        let past_due = match &monitor {
            Some(monitor) => match monitor.check_past_due(&self.id, now, &self.schedule).await {
                Ok(past_due) => Some(past_due),
                Err(e) => {
                    error!(error = %e, "past-due check failed");
                    self.state.send_replace(DriverState::Created);
                    return Err(e.into());
                }
            },
            None => None,
        };

        let is_past_due = past_due.as_ref().is_some_and(|p| p.is_past_due);
        if is_past_due || self.options.run_on_startup {
            let info = TimerInfo {
                schedule: Arc::clone(&self.schedule),
                status: past_due.and_then(|p| p.status),
                is_past_due,
            };
            self.invoker.invoke(info, now).await;
            if let Some(monitor) = &monitor {
                let status =
                    ScheduleStatus::new(now, self.schedule.next_occurrence(now), self.clock.now());
                persist(monitor.as_ref(), &self.id, &status, &self.invoker).await;
            }
        }

        self.cancel.send_replace(false);
        let run = RunLoop {
            id: self.id.clone(),
            schedule: Arc::clone(&self.schedule),
            invoker: self.invoker.clone(),
            monitor,
            clock: Arc::clone(&self.clock),
            max_segment: self.options.max_segment,
            state: Arc::clone(&self.state),
            cancel: self.cancel.subscribe(),
        };
        self.task = Some(tokio::spawn(run.run(now)));
        Ok(())
    }

    /// Cancel the pending wait and wait for an in-progress callback to
    /// finish. Nothing fires afterwards.
    pub async fn stop(&mut self) -> Result<(), TimerError> {
        match self.state() {
            DriverState::Disposed => return Err(TimerError::Disposed(self.id.clone())),
            DriverState::Created | DriverState::Stopped => return Ok(()),
            DriverState::Started | DriverState::Running => {}
        }
        self.cancel.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(schedule_id = %self.id, error = %e, "timer task failed");
            }
        }
        self.state.send_replace(DriverState::Stopped);
        info!(schedule_id = %self.id, "timer stopped");
        Ok(())
    }

    /// Request a stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Stop if needed and release the driver. Calling it again is a no-op.
    pub async fn dispose(&mut self) -> Result<(), TimerError> {
        if self.state() == DriverState::Disposed {
            return Ok(());
        }
        self.stop().await?;
        self.state.send_replace(DriverState::Disposed);
        Ok(())
    }

    fn active_monitor(&self) -> Option<Arc<dyn ScheduleMonitor>> {
        if !self.options.use_monitor {
            return None;
        }
        if self.schedule.should_disable_monitor() {
            debug!("schedule fires too often to track status");
            return None;
        }
        self.monitor.clone()
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

/// State owned by the background task.
struct RunLoop {
    id: ScheduleId,
    schedule: Arc<Schedule>,
    invoker: Invoker,
    monitor: Option<Arc<dyn ScheduleMonitor>>,
    clock: Arc<dyn Clock>,
    max_segment: StdDuration,
    state: Arc<watch::Sender<DriverState>>,
    cancel: watch::Receiver<bool>,
}

impl RunLoop {
    async fn run(mut self, mut base: DateTime<Utc>) {
        loop {
            if *self.cancel.borrow() {
                break;
            }

            let target = match self.arm_target(base) {
                Ok(target) => target,
                Err(e) => {
                    error!(schedule_id = %self.id, error = %e, "timer terminated");
                    self.invoker.report(TimerFault::Terminated {
                        schedule_id: self.id.clone(),
                        error: e,
                    });
                    break;
                }
            };
            self.state.send_if_modified(|state| {
                let armed = *state == DriverState::Started;
                if armed {
                    *state = DriverState::Running;
                }
                armed
            });

            if !self.wait_until(target).await {
                break;
            }

            let status = match &self.monitor {
                Some(monitor) => match monitor.get_status(&self.id).await {
                    Ok(status) => status,
                    Err(error) => {
                        warn!(schedule_id = %self.id, error = %error, "failed to read status");
                        self.invoker.report(TimerFault::Monitor {
                            schedule_id: self.id.clone(),
                            error,
                        });
                        None
                    }
                },
                None => None,
            };
            let info = TimerInfo {
                schedule: Arc::clone(&self.schedule),
                status,
                is_past_due: false,
            };
            self.invoker.invoke(info, target).await;

            if let Some(monitor) = &self.monitor {
                let status = ScheduleStatus::new(
                    target,
                    self.schedule.next_occurrence(target),
                    self.clock.now(),
                );
                persist(monitor.as_ref(), &self.id, &status, &self.invoker).await;
            }
            base = target;
        }

        self.state.send_if_modified(|state| {
            let active = matches!(*state, DriverState::Started | DriverState::Running);
            if active {
                *state = DriverState::Stopped;
            }
            active
        });
        debug!(schedule_id = %self.id, "timer loop exited");
    }

    /// The next occurrence after `base`, or after the current clock when
    /// that one has already passed.
    ///
    /// Fails only when the schedule has no occurrence left before the end of
    /// representable time, where `next_occurrence` saturates.
    fn arm_target(&self, base: DateTime<Utc>) -> Result<DateTime<Utc>, TimerError> {
        let now = self.clock.now();
        let armable =
            |target: DateTime<Utc>| target > now && target < DateTime::<Utc>::MAX_UTC;
        let target = self.schedule.next_occurrence(base);
        if armable(target) {
            return Ok(target);
        }
        debug!(schedule_id = %self.id, %target, %now, "occurrence already passed, recomputing");
        let retry = self.schedule.next_occurrence(now);
        if armable(retry) {
            Ok(retry)
        } else {
            Err(TimerError::Arm {
                id: self.id.clone(),
                target: retry,
                now,
            })
        }
    }

    /// Sleep until the clock reaches `target`. Returns `false` when cancelled.
    async fn wait_until(&mut self, target: DateTime<Utc>) -> bool {
        loop {
            let remaining = match (target - self.clock.now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => return true,
            };
            for segment in Segments::new(remaining, self.max_segment) {
                trace!(schedule_id = %self.id, %target, ?segment, "arming wait segment");
                tokio::select! {
                    biased;
                    _ = cancelled(&mut self.cancel) => return false,
                    _ = self.clock.sleep(segment) => {}
                }
            }
        }
    }
}

/// Resolves once cancellation is requested or the driver is dropped.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

async fn persist(
    monitor: &dyn ScheduleMonitor,
    id: &ScheduleId,
    status: &ScheduleStatus,
    invoker: &Invoker,
) {
    if let Err(error) = monitor.set_status(id, status).await {
        warn!(schedule_id = %id, error = %error, "failed to record status");
        invoker.report(TimerFault::Monitor {
            schedule_id: id.clone(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DAY: StdDuration = StdDuration::from_secs(24 * 60 * 60);

    #[test]
    fn short_delay_is_one_segment() {
        let segments: Vec<_> = Segments::new(DAY * 7 / 2, DAY * 7).collect();
        assert_eq!(segments, vec![DAY * 7 / 2]);
    }

    #[test]
    fn long_delay_splits_with_remainder_last() {
        let segments: Vec<_> = Segments::new(DAY * 16, DAY * 7).collect();
        assert_eq!(segments, vec![DAY * 7, DAY * 7, DAY * 2]);
    }

    #[test]
    fn two_full_segments_and_four_days() {
        let max = DEFAULT_MAX_SEGMENT;
        let segments: Vec<_> = Segments::new(max * 2 + DAY * 4, max).collect();
        assert_eq!(segments, vec![max, max, DAY * 4]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let segments: Vec<_> = Segments::new(DAY * 14, DAY * 7).collect();
        assert_eq!(segments, vec![DAY * 7, DAY * 7]);
        assert_eq!(Segments::new(StdDuration::ZERO, DAY).count(), 0);
        assert_eq!(Segments::new(DAY, StdDuration::ZERO).collect::<Vec<_>>(), vec![DAY]);
    }

    #[test]
    fn default_options() {
        let options = TimerOptions::default();
        assert_eq!(options.max_segment, DAY * 24);
        assert!(options.use_monitor);
        assert!(!options.run_on_startup);
    }
}
