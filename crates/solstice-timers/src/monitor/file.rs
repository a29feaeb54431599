//! Status store backed by one JSON file per schedule.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ScheduleMonitor;
use crate::{MonitorError, ScheduleId, ScheduleStatus};

const STATUS_SUFFIX: &str = ".status.json";

/// Stores each status at `<dir>/<id>.status.json`.
///
/// Writes go to a temporary file in the same directory that is then renamed
/// over the target, so a reader sees either the old record or the new one.
#[derive(Debug, Clone)]
pub struct FileScheduleMonitor {
    dir: PathBuf,
}

impl FileScheduleMonitor {
    /// Use `dir` for status files. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Use `dir` for status files, creating it now.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, MonitorError> {
        let monitor = Self::new(dir);
        tokio::fs::create_dir_all(&monitor.dir).await?;
        Ok(monitor)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the status file for `id`.
    pub fn status_path(&self, id: &ScheduleId) -> PathBuf {
        self.dir.join(format!("{id}{STATUS_SUFFIX}"))
    }
}

#[async_trait]
impl ScheduleMonitor for FileScheduleMonitor {
    async fn get_status(&self, id: &ScheduleId) -> Result<Option<ScheduleStatus>, MonitorError> {
        let path = self.status_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let status = serde_json::from_slice(&bytes).map_err(|source| MonitorError::Corrupt {
            id: id.clone(),
            source,
        })?;
        Ok(Some(status))
    }

    async fn set_status(
        &self,
        id: &ScheduleId,
        status: &ScheduleStatus,
    ) -> Result<(), MonitorError> {
        let json = serde_json::to_vec_pretty(status)
            .map_err(|e| MonitorError::Unavailable(format!("failed to encode status: {e}")))?;
        let dir = self.dir.clone();
        let path = self.status_path(id);

        tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&json)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| MonitorError::Unavailable(format!("status writer panicked: {e}")))??;

        debug!(schedule_id = %id, "status written");
        Ok(())
    }
}
