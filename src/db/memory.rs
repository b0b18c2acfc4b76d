use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::db::models::{AnprEvent, Camera, CameraStatus, Recording, StreamMeta, User};
use crate::db::{AnprFilter, MetadataStore, RecordingFilter, SystemStats};
use crate::error::Error;

/// In-memory metadata store.
///
/// Backs tests and ephemeral deployments; the same contract as the
/// Postgres store, with all rows held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    cameras: RwLock<HashMap<Uuid, Camera>>,
    recordings: RwLock<HashMap<Uuid, Recording>>,
    anpr_events: RwLock<HashMap<Uuid, AnprEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().unwrap();
        if users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(Error::Conflict(format!("email already registered: {}", user.email)).into());
        }
        if users.values().any(|u| u.username == user.username) {
            return Err(
                Error::Conflict(format!("username already taken: {}", user.username)).into(),
            );
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let users = self.users.read().unwrap();
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().unwrap();
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn update_user_last_login(&self, id: &Uuid) -> Result<()> {
        let mut users = self.users.write().unwrap();
        if let Some(user) = users.get_mut(id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete_user(&self, id: &Uuid) -> Result<bool> {
        Ok(self.users.write().unwrap().remove(id).is_some())
    }

    async fn put_camera(&self, camera: &Camera) -> Result<Camera> {
        let mut cameras = self.cameras.write().unwrap();
        cameras.insert(camera.id, camera.clone());
        Ok(camera.clone())
    }

    async fn get_camera(&self, id: &Uuid) -> Result<Option<Camera>> {
        let cameras = self.cameras.read().unwrap();
        Ok(cameras.get(id).cloned())
    }

    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let cameras = self.cameras.read().unwrap();
        let mut list: Vec<Camera> = cameras.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn delete_camera(&self, id: &Uuid) -> Result<bool> {
        let removed = self.cameras.write().unwrap().remove(id).is_some();
        if removed {
            self.recordings
                .write()
                .unwrap()
                .retain(|_, r| r.camera_id != *id);
            self.anpr_events
                .write()
                .unwrap()
                .retain(|_, e| e.camera_id != *id);
        }
        Ok(removed)
    }

    async fn update_camera_status(
        &self,
        id: &Uuid,
        status: CameraStatus,
        last_seen: Option<DateTime<Utc>>,
        observed: Option<StreamMeta>,
    ) -> Result<()> {
        let mut cameras = self.cameras.write().unwrap();
        let camera = cameras
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("camera {}", id)))?;
        camera.status = status;
        if let Some(seen) = last_seen {
            camera.last_seen = Some(seen);
        }
        if let Some(meta) = observed {
            camera.observed = meta;
        }
        camera.updated_at = Utc::now();
        Ok(())
    }

    async fn put_recording(&self, recording: &Recording) -> Result<Recording> {
        let mut recordings = self.recordings.write().unwrap();
        if recording.is_active() {
            let duplicate = recordings
                .values()
                .any(|r| r.camera_id == recording.camera_id && r.is_active() && r.id != recording.id);
            if duplicate {
                return Err(Error::AlreadyRecording(recording.camera_id).into());
            }
        }
        recordings.insert(recording.id, recording.clone());
        Ok(recording.clone())
    }

    async fn get_recording(&self, id: &Uuid) -> Result<Option<Recording>> {
        let recordings = self.recordings.read().unwrap();
        Ok(recordings.get(id).cloned())
    }

    async fn list_recordings(&self, filter: &RecordingFilter) -> Result<Vec<Recording>> {
        let recordings = self.recordings.read().unwrap();
        let mut list: Vec<Recording> = recordings
            .values()
            .filter(|r| filter.camera_id.map_or(true, |id| r.camera_id == id))
            .filter(|r| filter.from.map_or(true, |from| r.start_time >= from))
            .filter(|r| filter.to.map_or(true, |to| r.start_time <= to))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(list)
    }

    async fn delete_recording(&self, id: &Uuid) -> Result<bool> {
        Ok(self.recordings.write().unwrap().remove(id).is_some())
    }

    async fn active_recording(&self, camera_id: &Uuid) -> Result<Option<Recording>> {
        let recordings = self.recordings.read().unwrap();
        Ok(recordings
            .values()
            .find(|r| r.camera_id == *camera_id && r.is_active())
            .cloned())
    }

    async fn expired_recordings(
        &self,
        camera_id: &Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Recording>> {
        let recordings = self.recordings.read().unwrap();
        let mut list: Vec<Recording> = recordings
            .values()
            .filter(|r| r.camera_id == *camera_id && !r.is_active() && r.start_time < cutoff)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(list)
    }

    async fn put_anpr_event(&self, event: &AnprEvent) -> Result<AnprEvent> {
        self.anpr_events
            .write()
            .unwrap()
            .insert(event.id, event.clone());
        Ok(event.clone())
    }

    async fn get_anpr_event(&self, id: &Uuid) -> Result<Option<AnprEvent>> {
        Ok(self.anpr_events.read().unwrap().get(id).cloned())
    }

    async fn delete_anpr_event(&self, id: &Uuid) -> Result<bool> {
        Ok(self.anpr_events.write().unwrap().remove(id).is_some())
    }

    async fn list_anpr_events(&self, filter: &AnprFilter) -> Result<Vec<AnprEvent>> {
        let events = self.anpr_events.read().unwrap();
        let needle = filter.plate.as_ref().map(|p| p.to_ascii_uppercase());
        let mut list: Vec<AnprEvent> = events
            .values()
            .filter(|e| filter.camera_id.map_or(true, |id| e.camera_id == id))
            .filter(|e| filter.from.map_or(true, |from| e.timestamp >= from))
            .filter(|e| filter.to.map_or(true, |to| e.timestamp <= to))
            .filter(|e| {
                needle
                    .as_ref()
                    .map_or(true, |n| e.plate.to_ascii_uppercase().contains(n))
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(list)
    }

    async fn count_anpr_events(
        &self,
        camera_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let events = self.anpr_events.read().unwrap();
        Ok(events
            .values()
            .filter(|e| camera_id.map_or(true, |id| e.camera_id == id))
            .filter(|e| since.map_or(true, |s| e.timestamp >= s))
            .count() as u64)
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let midnight = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| dt.and_local_timezone(Local).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let cameras = self.cameras.read().unwrap();
        let recordings = self.recordings.read().unwrap();
        let events = self.anpr_events.read().unwrap();

        Ok(SystemStats {
            total_cameras: cameras.len() as u64,
            online_cameras: cameras
                .values()
                .filter(|c| c.status == CameraStatus::Online)
                .count() as u64,
            active_recordings: recordings.values().filter(|r| r.is_active()).count() as u64,
            anpr_events_today: events.values().filter(|e| e.timestamp >= midnight).count() as u64,
            storage_used_bytes: None,
            storage_total_bytes: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BoundingBox;
    use std::path::PathBuf;

    fn camera(name: &str) -> Camera {
        Camera::new(name, "rtsp://10.0.0.2/stream")
    }

    fn event(camera_id: Uuid, plate: &str) -> AnprEvent {
        AnprEvent {
            id: Uuid::new_v4(),
            camera_id,
            timestamp: Utc::now(),
            plate: plate.to_string(),
            confidence: 0.9,
            snapshot_path: PathBuf::from("/tmp/frame.jpg"),
            bbox: BoundingBox::default(),
            detector_meta: None,
        }
    }

    #[tokio::test]
    async fn cameras_listed_by_name_ascending() {
        let store = MemoryStore::new();
        store.put_camera(&camera("Zulu")).await.unwrap();
        store.put_camera(&camera("Alpha")).await.unwrap();
        store.put_camera(&camera("Mike")).await.unwrap();

        let names: Vec<String> = store
            .list_cameras()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Mike", "Zulu"]);
    }

    #[tokio::test]
    async fn second_active_recording_is_rejected() {
        let store = MemoryStore::new();
        let cam = camera("Gate");
        store.put_camera(&cam).await.unwrap();

        let first = Recording::begin(cam.id, PathBuf::from("/tmp/a.mp4"), "mp4");
        store.put_recording(&first).await.unwrap();

        let second = Recording::begin(cam.id, PathBuf::from("/tmp/b.mp4"), "mp4");
        let err = store.put_recording(&second).await.unwrap_err();
        assert!(err.to_string().contains("Already recording"));

        // Finalizing the first frees the slot
        let mut finalized = first;
        finalized.finalize(Utc::now());
        store.put_recording(&finalized).await.unwrap();
        store.put_recording(&second).await.unwrap();
    }

    #[tokio::test]
    async fn camera_delete_cascades() {
        let store = MemoryStore::new();
        let cam = camera("Gate");
        store.put_camera(&cam).await.unwrap();
        store
            .put_recording(&Recording::begin(cam.id, PathBuf::from("/tmp/a.mp4"), "mp4"))
            .await
            .unwrap();
        store.put_anpr_event(&event(cam.id, "ABC1234")).await.unwrap();

        assert!(store.delete_camera(&cam.id).await.unwrap());
        assert!(store
            .list_recordings(&RecordingFilter {
                camera_id: Some(cam.id),
                ..Default::default()
            })
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count_anpr_events(Some(cam.id), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn anpr_filter_matches_plate_substring_case_insensitive() {
        let store = MemoryStore::new();
        let cam = camera("Gate");
        store.put_camera(&cam).await.unwrap();
        store.put_anpr_event(&event(cam.id, "ABC1234")).await.unwrap();
        store.put_anpr_event(&event(cam.id, "XYZ9876")).await.unwrap();

        let hits = store
            .list_anpr_events(&AnprFilter {
                plate: Some("bc12".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].plate, "ABC1234");
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let user = User {
            id: Uuid::new_v4(),
            username: "admin".into(),
            email: "admin@example.com".into(),
            password_hash: "x".into(),
            role: crate::db::models::UserRole::Admin,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login: None,
            active: true,
        };
        store.create_user(&user).await.unwrap();

        let dup = User {
            id: Uuid::new_v4(),
            username: "admin2".into(),
            email: "ADMIN@example.com".into(),
            ..user.clone()
        };
        assert!(store.create_user(&dup).await.is_err());
    }
}
