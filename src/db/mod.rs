use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;
pub mod migrations;
pub mod models;
pub mod postgres;

use models::{AnprEvent, Camera, CameraStatus, Recording, StreamMeta, User};

/// Filters for recording listings
#[derive(Debug, Clone, Default)]
pub struct RecordingFilter {
    pub camera_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Filters for ANPR event listings
#[derive(Debug, Clone, Default)]
pub struct AnprFilter {
    pub camera_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring match on the plate text
    pub plate: Option<String>,
}

/// Row aggregates for the stats endpoint. Storage figures are filled in by
/// the control surface when the platform can report them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_cameras: u64,
    pub online_cameras: u64,
    pub active_recordings: u64,
    pub anpr_events_today: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_used_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_total_bytes: Option<u64>,
}

/// Persistent metadata authority.
///
/// Implementations must provide linearizable per-row updates; callers
/// serialize writes per entity through the owning supervisor.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // Users
    async fn create_user(&self, user: &User) -> Result<User>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_user_last_login(&self, id: &Uuid) -> Result<()>;
    async fn delete_user(&self, id: &Uuid) -> Result<bool>;

    // Cameras
    async fn put_camera(&self, camera: &Camera) -> Result<Camera>;
    async fn get_camera(&self, id: &Uuid) -> Result<Option<Camera>>;
    /// All cameras ordered by name ascending.
    async fn list_cameras(&self) -> Result<Vec<Camera>>;
    /// Deletes the camera and cascades to its recordings and ANPR events.
    async fn delete_camera(&self, id: &Uuid) -> Result<bool>;
    async fn update_camera_status(
        &self,
        id: &Uuid,
        status: CameraStatus,
        last_seen: Option<DateTime<Utc>>,
        observed: Option<StreamMeta>,
    ) -> Result<()>;

    // Recordings
    async fn put_recording(&self, recording: &Recording) -> Result<Recording>;
    async fn get_recording(&self, id: &Uuid) -> Result<Option<Recording>>;
    /// Filtered listing ordered by start_time descending.
    async fn list_recordings(&self, filter: &RecordingFilter) -> Result<Vec<Recording>>;
    async fn delete_recording(&self, id: &Uuid) -> Result<bool>;
    /// The at-most-one recording with `end_time = null` for a camera.
    async fn active_recording(&self, camera_id: &Uuid) -> Result<Option<Recording>>;
    /// Finalized recordings started before `cutoff`, oldest first.
    async fn expired_recordings(
        &self,
        camera_id: &Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Recording>>;

    // ANPR events
    async fn put_anpr_event(&self, event: &AnprEvent) -> Result<AnprEvent>;
    async fn get_anpr_event(&self, id: &Uuid) -> Result<Option<AnprEvent>>;
    /// Administrative purge of a single event.
    async fn delete_anpr_event(&self, id: &Uuid) -> Result<bool>;
    async fn list_anpr_events(&self, filter: &AnprFilter) -> Result<Vec<AnprEvent>>;
    async fn count_anpr_events(
        &self,
        camera_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    // Aggregates
    async fn system_stats(&self) -> Result<SystemStats>;
}
