use chrono::{Duration as ChronoDuration, Utc};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RetentionConfig;
use crate::db::MetadataStore;

/// Background sweeper enforcing per-camera recording retention.
///
/// Runs once at startup and then every sweep interval (24 h by default).
/// For each camera, finalized recordings older than its retention window
/// are removed: file first, then row. A missing file is fine, a row
/// without a file still goes. In-progress recordings are never touched.
pub struct RetentionCollector {
    config: RetentionConfig,
    store: Arc<dyn MetadataStore>,
}

impl RetentionCollector {
    pub fn new(config: RetentionConfig, store: Arc<dyn MetadataStore>) -> Self {
        Self { config, store }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            "Retention collector started (interval {} s)",
            self.config.sweep_interval_secs
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                // First tick fires immediately: the startup sweep
                _ = ticker.tick() => {
                    let deleted = self.sweep().await;
                    if deleted > 0 {
                        info!("Retention sweep removed {} recording(s)", deleted);
                    }
                }
            }
        }
        info!("Retention collector stopped");
    }

    /// One full pass; returns the number of recordings removed.
    pub async fn sweep(&self) -> u64 {
        let cameras = match self.store.list_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                warn!("Retention sweep could not list cameras: {}", e);
                return 0;
            }
        };

        let mut deleted = 0;
        for camera in cameras {
            let cutoff =
                Utc::now() - ChronoDuration::days(camera.recording.retention_days as i64);
            let expired = match self.store.expired_recordings(&camera.id, cutoff).await {
                Ok(expired) => expired,
                Err(e) => {
                    warn!(
                        "Retention sweep failed to list recordings for camera {}: {}",
                        camera.id, e
                    );
                    continue;
                }
            };

            for recording in expired {
                match tokio::fs::remove_file(&recording.file_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        // Leave the row so the next sweep retries the file
                        warn!(
                            "Could not delete {}: {}",
                            recording.file_path.display(),
                            e
                        );
                        continue;
                    }
                }

                match self.store.delete_recording(&recording.id).await {
                    Ok(true) => deleted += 1,
                    Ok(false) => {}
                    Err(e) => warn!(
                        "Could not delete recording row {}: {}",
                        recording.id, e
                    ),
                }
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::{Camera, Recording};
    use crate::db::RecordingFilter;
    use std::path::PathBuf;

    fn recording_at(camera_id: uuid::Uuid, path: PathBuf, days_ago: i64) -> Recording {
        let start = Utc::now() - ChronoDuration::days(days_ago);
        let mut rec = Recording::begin(camera_id, path, "mp4");
        rec.start_time = start;
        rec.date = start.date_naive();
        rec.end_time = Some(start + ChronoDuration::minutes(10));
        rec
    }

    #[tokio::test]
    async fn expired_file_and_row_are_removed_fresh_ones_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());

        let mut camera = Camera::new("Gate", "rtsp://10.0.0.2/stream");
        camera.recording.retention_days = 7;
        store.put_camera(&camera).await.unwrap();

        let old_path = dir.path().join("old.mp4");
        std::fs::write(&old_path, b"old").unwrap();
        let old = recording_at(camera.id, old_path.clone(), 8);
        store.put_recording(&old).await.unwrap();

        let new_path = dir.path().join("new.mp4");
        std::fs::write(&new_path, b"new").unwrap();
        let new = recording_at(camera.id, new_path.clone(), 1);
        store.put_recording(&new).await.unwrap();

        let collector =
            RetentionCollector::new(RetentionConfig { sweep_interval_secs: 3600 }, store.clone());
        assert_eq!(collector.sweep().await, 1);

        assert!(!old_path.exists());
        assert!(new_path.exists());
        let remaining = store
            .list_recordings(&RecordingFilter::default())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, new.id);
    }

    #[tokio::test]
    async fn missing_file_still_deletes_the_row() {
        let store = Arc::new(MemoryStore::new());
        let mut camera = Camera::new("Gate", "rtsp://10.0.0.2/stream");
        camera.recording.retention_days = 1;
        store.put_camera(&camera).await.unwrap();

        let ghost = recording_at(camera.id, PathBuf::from("/nonexistent/ghost.mp4"), 3);
        store.put_recording(&ghost).await.unwrap();

        let collector =
            RetentionCollector::new(RetentionConfig { sweep_interval_secs: 3600 }, store.clone());
        assert_eq!(collector.sweep().await, 1);
        assert!(store
            .list_recordings(&RecordingFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn in_progress_recordings_are_never_deleted() {
        let store = Arc::new(MemoryStore::new());
        let mut camera = Camera::new("Gate", "rtsp://10.0.0.2/stream");
        camera.recording.retention_days = 1;
        store.put_camera(&camera).await.unwrap();

        // Ancient but still open
        let mut active = Recording::begin(camera.id, PathBuf::from("/tmp/active.mp4"), "mp4");
        active.start_time = Utc::now() - ChronoDuration::days(30);
        store.put_recording(&active).await.unwrap();

        let collector =
            RetentionCollector::new(RetentionConfig { sweep_interval_secs: 3600 }, store.clone());
        assert_eq!(collector.sweep().await, 0);
        assert!(store.active_recording(&camera.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn one_day_retention_deletes_just_past_the_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut camera = Camera::new("Gate", "rtsp://10.0.0.2/stream");
        camera.recording.retention_days = 1;
        store.put_camera(&camera).await.unwrap();

        let path = dir.path().join("boundary.mp4");
        std::fs::write(&path, b"x").unwrap();
        let mut rec = Recording::begin(camera.id, path.clone(), "mp4");
        rec.start_time = Utc::now() - ChronoDuration::hours(24) - ChronoDuration::minutes(1);
        rec.end_time = Some(rec.start_time + ChronoDuration::minutes(5));
        store.put_recording(&rec).await.unwrap();

        let collector =
            RetentionCollector::new(RetentionConfig { sweep_interval_secs: 3600 }, store.clone());
        assert_eq!(collector.sweep().await, 1);
        assert!(!path.exists());
    }
}
