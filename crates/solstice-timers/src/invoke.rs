//! Callback invocation and failure reporting.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::{MonitorError, Schedule, ScheduleId, ScheduleStatus, TimerError};

/// What a callback learns about the occurrence it runs for.
#[derive(Debug, Clone)]
pub struct TimerInfo {
    /// The schedule that fired.
    pub schedule: Arc<Schedule>,
    /// Stored status at invocation time; `None` when unmonitored or never
    /// recorded.
    pub status: Option<ScheduleStatus>,
    /// Whether this invocation replays a missed occurrence.
    pub is_past_due: bool,
}

impl TimerInfo {
    /// Render the next `count` occurrences after `now`.
    pub fn format_next_occurrences(&self, count: usize, now: DateTime<Utc>) -> String {
        self.schedule.format_next_occurrences(count, now)
    }
}

/// A callback run at each occurrence.
///
/// Returning `Err` or panicking is reported as a [`TimerFault`]; the timer
/// keeps its schedule either way.
#[async_trait]
pub trait TimerHandler: Send + Sync + 'static {
    async fn invoke(&self, info: TimerInfo) -> Result<(), String>;
}

#[async_trait]
impl<F, Fut> TimerHandler for F
where
    F: Fn(TimerInfo) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    async fn invoke(&self, info: TimerInfo) -> Result<(), String> {
        self(info).await
    }
}

/// A failure the driver recovered from, delivered to the host.
#[derive(Debug)]
pub enum TimerFault {
    /// The callback returned an error or panicked.
    Callback {
        schedule_id: ScheduleId,
        occurrence: DateTime<Utc>,
        message: String,
    },
    /// Reading or writing status failed after start; the driver kept its
    /// in-memory cadence.
    Monitor {
        schedule_id: ScheduleId,
        error: MonitorError,
    },
    /// The driver could not arm its next wait and stopped.
    Terminated {
        schedule_id: ScheduleId,
        error: TimerError,
    },
}

impl TimerFault {
    pub fn schedule_id(&self) -> &ScheduleId {
        match self {
            Self::Callback { schedule_id, .. }
            | Self::Monitor { schedule_id, .. }
            | Self::Terminated { schedule_id, .. } => schedule_id,
        }
    }
}

/// Sink for [`TimerFault`]s.
pub type FaultSink = mpsc::UnboundedSender<TimerFault>;

/// Runs a handler in its own task and routes failures to the log and the
/// optional fault sink.
#[derive(Clone)]
pub(crate) struct Invoker {
    id: ScheduleId,
    handler: Arc<dyn TimerHandler>,
    faults: Option<FaultSink>,
}

impl Invoker {
    pub(crate) fn new(id: ScheduleId, handler: Arc<dyn TimerHandler>) -> Self {
        Self {
            id,
            handler,
            faults: None,
        }
    }

    pub(crate) fn set_fault_sink(&mut self, sink: FaultSink) {
        self.faults = Some(sink);
    }

    /// Invoke the handler for `occurrence` and wait for it to finish.
    ///
    /// Never fails: errors and panics are reported, not propagated.
    pub(crate) async fn invoke(&self, info: TimerInfo, occurrence: DateTime<Utc>) {
        let handler = Arc::clone(&self.handler);
        let past_due = info.is_past_due;
        debug!(schedule_id = %self.id, %occurrence, past_due, "invoking timer callback");

        let message = match tokio::spawn(async move { handler.invoke(info).await }).await {
            Ok(Ok(())) => return,
            Ok(Err(message)) => message,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                format!("callback panicked: {detail}")
            }
            Err(join_error) => format!("callback task aborted: {join_error}"),
        };

        error!(schedule_id = %self.id, %occurrence, error = %message, "timer callback failed");
        self.report(TimerFault::Callback {
            schedule_id: self.id.clone(),
            occurrence,
            message,
        });
    }

    pub(crate) fn report(&self, fault: TimerFault) {
        if let Some(sink) = &self.faults {
            // A closed sink means the host stopped listening.
            let _ = sink.send(fault);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TimerInfo {
        TimerInfo {
            schedule: Arc::new(Schedule::parse("00:05:00").unwrap()),
            status: None,
            is_past_due: false,
        }
    }

    #[tokio::test]
    async fn closure_handlers_run() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = move |info: TimerInfo| {
            let tx = tx.clone();
            async move { tx.send(info.is_past_due).map_err(|e| e.to_string()) }
        };
        let invoker = Invoker::new(ScheduleId::for_function("t"), Arc::new(handler));
        invoker.invoke(info(), Utc::now()).await;
        assert_eq!(rx.recv().await, Some(false));
    }

    #[tokio::test]
    async fn errors_and_panics_become_faults() {
        let handler = |info: TimerInfo| async move {
            if info.is_past_due {
                panic!("boom");
            }
            Err::<(), _>("nope".to_string())
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut invoker = Invoker::new(ScheduleId::for_function("t"), Arc::new(handler));
        invoker.set_fault_sink(tx);

        invoker.invoke(info(), Utc::now()).await;
        let mut past_due = info();
        past_due.is_past_due = true;
        invoker.invoke(past_due, Utc::now()).await;

        match rx.recv().await {
            Some(TimerFault::Callback { message, .. }) => assert_eq!(message, "nope"),
            other => panic!("unexpected fault: {other:?}"),
        }
        match rx.recv().await {
            Some(TimerFault::Callback { message, .. }) => {
                assert_eq!(message, "callback panicked: boom")
            }
            other => panic!("unexpected fault: {other:?}"),
        }
    }
}
