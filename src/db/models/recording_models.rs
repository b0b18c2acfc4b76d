use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Recording model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: Uuid,
    pub camera_id: Uuid,
    /// Logical date the recording belongs to (directory bucket)
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    /// `None` while the recording is still being written
    pub end_time: Option<DateTime<Utc>>,
    pub file_path: PathBuf,
    /// Whole seconds; populated at finalization
    pub duration_secs: u64,
    /// Bytes on disk; populated at finalization
    pub size_bytes: u64,
    pub format: String,
    pub metadata: Option<serde_json::Value>,
}

impl Recording {
    /// Open a new in-progress recording row.
    pub fn begin(camera_id: Uuid, file_path: PathBuf, format: &str) -> Self {
        let start_time = Utc::now();
        Self {
            id: Uuid::new_v4(),
            camera_id,
            date: start_time.date_naive(),
            start_time,
            end_time: None,
            file_path,
            duration_secs: 0,
            size_bytes: 0,
            format: format.to_string(),
            metadata: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Close the recording, deriving duration from the wall clock and size
    /// from the file when it exists.
    pub fn finalize(&mut self, end_time: DateTime<Utc>) {
        let end_time = end_time.max(self.start_time);
        self.duration_secs = (end_time - self.start_time).num_seconds().max(0) as u64;
        self.size_bytes = std::fs::metadata(&self.file_path)
            .map(|m| m.len())
            .unwrap_or(0);
        self.end_time = Some(end_time);
    }
}
