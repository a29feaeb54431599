//! Stateful property testing for status monitors and past-due detection.
//!
//! Drives the in-memory and file-backed monitors through random sequences
//! of reads, writes, clock advances and past-due checks, comparing both
//! against a reference model. The model tracks:
//!
//! - The stored status per schedule id
//! - The verdict of the most recent past-due check
//! - Repair of `next` when it no longer follows `last`

use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use solstice_timers::{
    FileScheduleMonitor, MemoryScheduleMonitor, Schedule, ScheduleId, ScheduleMonitor,
    ScheduleStatus,
};

const IDS: &[&str] = &["jobs::alpha", "jobs::beta", "jobs::gamma"];

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn hourly() -> Schedule {
    Schedule::parse("01:00:00").unwrap()
}

/// Operations applied to both the model and the monitors.
#[derive(Debug, Clone)]
pub enum MonitorOperation {
    /// Move the clock forward.
    Advance { minutes: i64 },
    /// Read a status; must match the model.
    Get { id: usize },
    /// Overwrite a status with arbitrary offsets from the current clock.
    Set {
        id: usize,
        last: Option<i64>,
        next: Option<i64>,
    },
    /// Run the past-due check.
    Check { id: usize },
}

/// Reference model of stored statuses.
#[derive(Clone, Debug)]
pub struct MonitorModel {
    pub now: DateTime<Utc>,
    pub statuses: HashMap<usize, ScheduleStatus>,
    pub last_verdict: Option<bool>,
}

impl ReferenceStateMachine for MonitorModel {
    type State = Self;
    type Transition = MonitorOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self {
            now: epoch(),
            statuses: HashMap::new(),
            last_verdict: None,
        })
        .boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        let id = 0..IDS.len();
        prop_oneof![
            2 => (1i64..200).prop_map(|minutes| MonitorOperation::Advance { minutes }),
            2 => id.clone().prop_map(|id| MonitorOperation::Get { id }),
            1 => (
                id.clone(),
                proptest::option::of(-300i64..300),
                proptest::option::of(-300i64..300),
            )
                .prop_map(|(id, last, next)| MonitorOperation::Set { id, last, next }),
            3 => id.prop_map(|id| MonitorOperation::Check { id }),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        let interval = Duration::hours(1);
        state.last_verdict = None;
        match transition {
            MonitorOperation::Advance { minutes } => {
                state.now += Duration::minutes(*minutes);
            }
            MonitorOperation::Get { .. } => {}
            MonitorOperation::Set { id, last, next } => {
                let now = state.now;
                state.statuses.insert(
                    *id,
                    ScheduleStatus {
                        last: last.map(|m| now + Duration::minutes(m)),
                        next: next.map(|m| now + Duration::minutes(m)),
                        last_updated: Some(now),
                    },
                );
            }
            MonitorOperation::Check { id } => {
                let now = state.now;
                let verdict = match state.statuses.get(id).cloned() {
                    None => {
                        state
                            .statuses
                            .insert(*id, ScheduleStatus::new(now, now + interval, now));
                        false
                    }
                    Some(mut status) => {
                        let repaired = match status.last {
                            Some(last) => Some(last + interval),
                            None if status.next.is_none() => Some(now + interval),
                            None => None,
                        };
                        if let Some(repaired) = repaired {
                            if status.next != Some(repaired) {
                                status.next = Some(repaired);
                                status.last_updated = Some(now);
                            }
                        }
                        let verdict = now >= status.next.unwrap_or(now);
                        state.statuses.insert(*id, status);
                        verdict
                    }
                };
                state.last_verdict = Some(verdict);
            }
        }
        state
    }
}

/// Both monitor implementations under test, plus the clock they share.
pub struct MonitorHarness {
    runtime: Runtime,
    memory: MemoryScheduleMonitor,
    file: FileScheduleMonitor,
    _dir: TempDir,
    now: DateTime<Utc>,
}

impl MonitorHarness {
    fn new() -> Self {
        let runtime = Runtime::new().expect("Failed to create tokio runtime");
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        Self {
            runtime,
            memory: MemoryScheduleMonitor::new(),
            file: FileScheduleMonitor::new(dir.path()),
            _dir: dir,
            now: epoch(),
        }
    }

    fn monitors(&self) -> [&dyn ScheduleMonitor; 2] {
        [&self.memory, &self.file]
    }

    fn apply_operation(&mut self, op: &MonitorOperation, model: &MonitorModel) {
        match op {
            MonitorOperation::Advance { minutes } => {
                self.now += Duration::minutes(*minutes);
            }
            MonitorOperation::Get { id } => {
                let schedule_id = ScheduleId::for_function(IDS[*id]);
                for monitor in self.monitors() {
                    let first = self.runtime.block_on(monitor.get_status(&schedule_id)).unwrap();
                    let second = self.runtime.block_on(monitor.get_status(&schedule_id)).unwrap();
                    assert_eq!(first, second, "get_status must be idempotent");
                    assert_eq!(first.as_ref(), model.statuses.get(id));
                }
            }
            MonitorOperation::Set { id, .. } => {
                let schedule_id = ScheduleId::for_function(IDS[*id]);
                let status = model.statuses[id].clone();
                for monitor in self.monitors() {
                    self.runtime
                        .block_on(monitor.set_status(&schedule_id, &status))
                        .unwrap();
                }
            }
            MonitorOperation::Check { id } => {
                let schedule_id = ScheduleId::for_function(IDS[*id]);
                let schedule = hourly();
                for monitor in self.monitors() {
                    let verdict = self
                        .runtime
                        .block_on(monitor.is_past_due(&schedule_id, self.now, &schedule))
                        .unwrap();
                    assert_eq!(Some(verdict), model.last_verdict);
                }
            }
        }
    }

    fn verify_invariants(&self, model: &MonitorModel) {
        assert_eq!(self.now, model.now);
        for (index, name) in IDS.iter().enumerate() {
            let id = ScheduleId::for_function(name);
            for monitor in self.monitors() {
                let stored = self.runtime.block_on(monitor.get_status(&id)).unwrap();
                assert_eq!(stored.as_ref(), model.statuses.get(&index));
            }
        }
    }
}

impl StateMachineTest for MonitorHarness {
    type SystemUnderTest = Self;
    type Reference = MonitorModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        mut state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        state.apply_operation(&transition, ref_state);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn monitor_state_machine_test(sequential 1..40 => MonitorHarness);
}

#[test]
fn check_after_restart_replays_once() {
    let harness = MonitorHarness::new();
    let id = ScheduleId::for_function("jobs::alpha");
    let schedule = hourly();
    let start = epoch();

    for monitor in harness.monitors() {
        // First sighting records status and is never past due.
        assert!(
            !harness
                .runtime
                .block_on(monitor.is_past_due(&id, start, &schedule))
                .unwrap()
        );
        // Ten hours of downtime still yields a single past-due verdict per
        // check; the caller records the replay before checking again.
        let later = start + Duration::hours(10);
        assert!(
            harness
                .runtime
                .block_on(monitor.is_past_due(&id, later, &schedule))
                .unwrap()
        );
        harness
            .runtime
            .block_on(monitor.set_status(
                &id,
                &ScheduleStatus::new(later, schedule.next_occurrence(later), later),
            ))
            .unwrap();
        assert!(
            !harness
                .runtime
                .block_on(monitor.is_past_due(&id, later, &schedule))
                .unwrap()
        );
    }
}
