//! In-process status store.

use async_trait::async_trait;
use dashmap::DashMap;

use super::ScheduleMonitor;
use crate::{MonitorError, ScheduleId, ScheduleStatus};

/// Keeps statuses in memory; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryScheduleMonitor {
    statuses: DashMap<ScheduleId, ScheduleStatus>,
}

impl MemoryScheduleMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of schedules with a recorded status.
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[async_trait]
impl ScheduleMonitor for MemoryScheduleMonitor {
    async fn get_status(&self, id: &ScheduleId) -> Result<Option<ScheduleStatus>, MonitorError> {
        Ok(self.statuses.get(id).map(|entry| entry.value().clone()))
    }

    async fn set_status(
        &self,
        id: &ScheduleId,
        status: &ScheduleStatus,
    ) -> Result<(), MonitorError> {
        self.statuses.insert(id.clone(), status.clone());
        Ok(())
    }
}
