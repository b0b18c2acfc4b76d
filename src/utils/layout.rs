use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Per-camera partitioning of the media tree.
///
/// ```text
/// streams/<camera-id>/live/index.m3u8
/// streams/<camera-id>/live/segment_###.ts
/// records/<camera-id>/<YYYY-MM-DD>/recording_<ISO-timestamp>.mp4
/// snapshots/<camera-id>/snapshot_<ISO-timestamp>.jpg
/// temp/anpr/frame_<camera-id>_<epoch-ms>.jpg
/// ```
///
/// No two tasks ever write to the same file: every path below is keyed by
/// camera id, and timestamps disambiguate within a camera.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn live_dir(&self, camera_id: &Uuid) -> PathBuf {
        self.root
            .join("streams")
            .join(camera_id.to_string())
            .join("live")
    }

    pub fn live_playlist(&self, camera_id: &Uuid) -> PathBuf {
        self.live_dir(camera_id).join("index.m3u8")
    }

    /// ffmpeg-style segment filename pattern for the live pipeline.
    pub fn live_segment_pattern(&self, camera_id: &Uuid) -> PathBuf {
        self.live_dir(camera_id).join("segment_%03d.ts")
    }

    pub fn recording_path(&self, camera_id: &Uuid, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join("records")
            .join(camera_id.to_string())
            .join(at.format("%Y-%m-%d").to_string())
            .join(format!("recording_{}.mp4", file_timestamp(at)))
    }

    pub fn snapshot_path(&self, camera_id: &Uuid, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join("snapshots")
            .join(camera_id.to_string())
            .join(format!("snapshot_{}.jpg", file_timestamp(at)))
    }

    pub fn temp_frame_path(&self, camera_id: &Uuid, at: DateTime<Utc>) -> PathBuf {
        self.root
            .join("temp")
            .join("anpr")
            .join(format!("frame_{}_{}.jpg", camera_id, at.timestamp_millis()))
    }
}

/// ISO-8601 timestamp made filename-safe: ':' and '.' become '-'.
fn file_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}
