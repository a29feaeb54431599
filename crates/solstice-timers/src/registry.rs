//! Owner of every timer driver in a process.

use std::collections::BTreeMap;

use tracing::{error, info};

use crate::{DriverState, ScheduleId, TimerDriver, TimerError};

/// Registered drivers, keyed by schedule id.
#[derive(Default)]
pub struct TimerRegistry {
    drivers: BTreeMap<ScheduleId, TimerDriver>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a driver. Ids must be unique.
    pub fn register(&mut self, driver: TimerDriver) -> Result<(), TimerError> {
        let id = driver.id().clone();
        if self.drivers.contains_key(&id) {
            return Err(TimerError::Duplicate(id));
        }
        info!(schedule_id = %id, schedule = %driver.schedule(), "registered timer");
        self.drivers.insert(id, driver);
        Ok(())
    }

    /// Start every driver still in `Created`, in id order.
    ///
    /// Stops at the first failure; drivers already started keep running.
    pub async fn start_all(&mut self) -> Result<(), TimerError> {
        for driver in self.drivers.values_mut() {
            if driver.state() == DriverState::Created {
                driver.start().await?;
            }
        }
        Ok(())
    }

    /// Stop every driver. Failures are logged and the rest still stop.
    pub async fn stop_all(&mut self) {
        for (id, driver) in &mut self.drivers {
            if let Err(e) = driver.stop().await {
                error!(schedule_id = %id, error = %e, "failed to stop timer");
            }
        }
    }

    /// Stop and dispose every driver, then forget them.
    pub async fn dispose_all(&mut self) {
        for (id, mut driver) in std::mem::take(&mut self.drivers) {
            if let Err(e) = driver.dispose().await {
                error!(schedule_id = %id, error = %e, "failed to dispose timer");
            }
        }
    }

    /// Start one driver by id.
    pub async fn start(&mut self, id: &ScheduleId) -> Result<(), TimerError> {
        self.get_mut(id)?.start().await
    }

    /// Stop one driver by id.
    pub async fn stop(&mut self, id: &ScheduleId) -> Result<(), TimerError> {
        self.get_mut(id)?.stop().await
    }

    pub fn ids(&self) -> impl Iterator<Item = &ScheduleId> {
        self.drivers.keys()
    }

    pub fn state(&self, id: &ScheduleId) -> Option<DriverState> {
        self.drivers.get(id).map(TimerDriver::state)
    }

    pub fn get(&self, id: &ScheduleId) -> Option<&TimerDriver> {
        self.drivers.get(id)
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    fn get_mut(&mut self, id: &ScheduleId) -> Result<&mut TimerDriver, TimerError> {
        self.drivers
            .get_mut(id)
            .ok_or_else(|| TimerError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Schedule, TimerInfo, TimerOptions};

    fn driver(name: &str) -> TimerDriver {
        TimerDriver::new(
            ScheduleId::for_function(name),
            Schedule::parse("01:00:00").unwrap(),
            |_info: TimerInfo| async { Ok::<(), String>(()) },
            TimerOptions::default(),
        )
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = TimerRegistry::new();
        registry.register(driver("jobs::a")).unwrap();
        registry.register(driver("jobs::b")).unwrap();
        let err = registry.register(driver("jobs::a")).unwrap_err();
        assert!(matches!(err, TimerError::Duplicate(id) if id.as_str() == "jobs__a"));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_all() {
        let mut registry = TimerRegistry::new();
        registry.register(driver("jobs::a")).unwrap();
        registry.register(driver("jobs::b")).unwrap();

        registry.start_all().await.unwrap();
        let ids: Vec<_> = registry.ids().cloned().collect();
        for id in &ids {
            assert_ne!(registry.state(id), Some(DriverState::Created));
        }

        registry.stop_all().await;
        for id in &ids {
            assert_eq!(registry.state(id), Some(DriverState::Stopped));
        }

        let missing = ScheduleId::for_function("jobs::missing");
        assert!(matches!(
            registry.start(&missing).await,
            Err(TimerError::NotFound(_))
        ));
        registry.dispose_all().await;
        assert!(registry.is_empty());
    }
}
