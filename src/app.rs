use anyhow::Result;
use log::{info, warn};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::anpr::AnprContext;
use crate::config::Config;
use crate::db::models::{Camera, Recording};
use crate::db::{MetadataStore, SystemStats};
use crate::error::Error;
use crate::health::HealthProber;
use crate::media::TranscoderDriver;
use crate::messaging::{EventBus, EventType};
use crate::retention::RetentionCollector;
use crate::security::{AuthService, CredentialVault};
use crate::supervisor::{CameraSupervisor, SupervisorCtx, SupervisorRegistry};
use crate::utils::MediaLayout;

/// The assembled application.
///
/// Built once at startup and passed by reference everywhere; there is no
/// module-level state. Owns the supervisor registry, the event bus, the
/// store and the background task lifecycles.
pub struct App {
    pub config: Config,
    pub store: Arc<dyn MetadataStore>,
    pub bus: EventBus,
    pub driver: Arc<dyn TranscoderDriver>,
    pub vault: Arc<CredentialVault>,
    pub layout: MediaLayout,
    pub registry: SupervisorRegistry,
    pub auth: AuthService,
    pub anpr: Arc<AnprContext>,
    cancel: CancellationToken,
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<dyn MetadataStore>,
        driver: Arc<dyn TranscoderDriver>,
    ) -> Result<Arc<Self>> {
        let vault = match &config.security.enc_key {
            Some(key) => Arc::new(CredentialVault::new(key.as_bytes())?),
            None => {
                // Without ENC_KEY sealed secrets do not survive a restart
                warn!("ENC_KEY is not set; using an ephemeral vault key");
                let key: [u8; 32] = rand::random();
                Arc::new(CredentialVault::new(&key)?)
            }
        };

        let bus = EventBus::new(config.events.capacity);
        let layout = MediaLayout::new(config.media.data_dir.clone());
        let auth = AuthService::new(store.clone(), &config.security);
        let anpr = Arc::new(AnprContext::from_config(config.anpr.clone()));

        Ok(Arc::new(Self {
            config,
            store,
            bus,
            driver,
            vault,
            layout,
            registry: SupervisorRegistry::new(),
            auth,
            anpr,
            cancel: CancellationToken::new(),
        }))
    }

    fn supervisor_ctx(&self) -> SupervisorCtx {
        SupervisorCtx {
            driver: self.driver.clone(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            vault: self.vault.clone(),
            layout: self.layout.clone(),
            media: self.config.media.clone(),
            anpr: self.anpr.clone(),
        }
    }

    /// Spawn supervisors for all stored cameras and start the background
    /// services.
    pub async fn bootstrap(&self) -> Result<()> {
        let cameras = self.store.list_cameras().await?;
        info!("Bootstrapping {} camera supervisor(s)", cameras.len());
        for camera in cameras {
            let handle = CameraSupervisor::spawn(camera, self.supervisor_ctx());
            if let Err(e) = handle.start().await {
                warn!("Camera {}: start failed: {}", handle.camera_id(), e);
            }
            self.registry.insert(handle).await;
        }

        HealthProber::new(
            self.config.health.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.registry.clone(),
        )
        .spawn(self.cancel.child_token());

        RetentionCollector::new(self.config.retention.clone(), self.store.clone())
            .spawn(self.cancel.child_token());

        Ok(())
    }

    /// Graceful teardown of all background work and child processes.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.cancel.cancel();
        self.registry.shutdown_all().await;
    }

    // ---- Camera lifecycle -------------------------------------------------

    /// Create a camera: seal its secret, persist, publish `camera-added`
    /// and bring its supervisor up.
    pub async fn create_camera(
        &self,
        mut camera: Camera,
        password: Option<&str>,
    ) -> Result<Camera, Error> {
        if let Some(password) = password {
            let sealed = self
                .vault
                .seal(password)
                .map_err(|e| Error::Crypto(e.to_string()))?;
            camera.secret = Some(sealed);
        }
        camera.validate()?;

        let stored = self
            .store
            .put_camera(&camera)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        let _ = self
            .bus
            .publish(EventType::CameraAdded, Some(stored.id), stored.sanitized());

        let handle = CameraSupervisor::spawn(stored.clone(), self.supervisor_ctx());
        handle.start().await?;
        self.registry.insert(handle).await;

        info!("Camera {} ({}) created", stored.name, stored.id);
        Ok(stored)
    }

    /// Update a camera's configuration through its supervisor, which owns
    /// the persistence, the `camera-updated` event and any restart.
    pub async fn update_camera(
        &self,
        id: &Uuid,
        mut updated: Camera,
        password: Option<&str>,
    ) -> Result<Camera, Error> {
        let existing = self.get_camera(id).await?;

        updated.id = existing.id;
        updated.created_at = existing.created_at;
        updated.secret = match password {
            Some(password) => Some(
                self.vault
                    .seal(password)
                    .map_err(|e| Error::Crypto(e.to_string()))?,
            ),
            None => existing.secret.clone(),
        };

        let handle = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", id)))?;
        handle.update_config(updated).await?;

        self.get_camera(id).await
    }

    /// Delete a camera: stop recording, stop the live child, remove the
    /// rows (cascading), publish `camera-deleted` — in that order.
    pub async fn delete_camera(&self, id: &Uuid) -> Result<(), Error> {
        self.get_camera(id).await?;

        if let Some(handle) = self.registry.remove(id).await {
            handle.shutdown().await?;
        }

        self.store
            .delete_camera(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        let _ = self
            .bus
            .publish(EventType::CameraDeleted, Some(*id), json!({ "id": id }));

        // The live directory holds only a stale window of segments
        let _ = tokio::fs::remove_dir_all(self.layout.live_dir(id)).await;

        info!("Camera {} deleted", id);
        Ok(())
    }

    pub async fn get_camera(&self, id: &Uuid) -> Result<Camera, Error> {
        self.store
            .get_camera(id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("camera {}", id)))
    }

    async fn supervisor(&self, id: &Uuid) -> Result<crate::supervisor::SupervisorHandle, Error> {
        self.registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("camera {}", id)))
    }

    // ---- Supervisor command pass-throughs ---------------------------------

    pub async fn start_recording(&self, id: &Uuid) -> Result<Recording, Error> {
        self.supervisor(id).await?.begin_recording().await
    }

    pub async fn stop_recording(&self, id: &Uuid) -> Result<Recording, Error> {
        self.supervisor(id).await?.end_recording().await
    }

    pub async fn snapshot(&self, id: &Uuid) -> Result<PathBuf, Error> {
        self.supervisor(id).await?.snapshot().await
    }

    pub async fn trigger_anpr(&self, id: &Uuid) -> Result<(), Error> {
        self.supervisor(id).await?.trigger_anpr().await
    }

    // ---- Aggregates -------------------------------------------------------

    /// Store aggregates plus best-effort storage figures for the data
    /// directory.
    pub async fn system_stats(&self) -> Result<SystemStats, Error> {
        let mut stats = self
            .store
            .system_stats()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if let Some((used, total)) = disk_usage(self.layout.root()) {
            stats.storage_used_bytes = Some(used);
            stats.storage_total_bytes = Some(total);
        }
        Ok(stats)
    }
}

/// (used, total) bytes of the filesystem backing `path`, when the platform
/// can tell us.
fn disk_usage(path: &Path) -> Option<(u64, u64)> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        let out = std::process::Command::new("df")
            .arg("-k")
            .arg(path)
            .output()
            .ok()?;
        if !out.status.success() {
            return None;
        }
        let output = String::from_utf8_lossy(&out.stdout);
        let line = output.lines().nth(1)?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let total_kb: u64 = fields.get(1)?.parse().ok()?;
        let used_kb: u64 = fields.get(2)?.parse().ok()?;
        Some((used_kb * 1024, total_kb * 1024))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = path;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::{AnprEvent, BoundingBox, CameraStatus};
    use crate::db::{AnprFilter, RecordingFilter};
    use crate::media::stub::StubDriver;
    use crate::messaging::EventType;
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        app: Arc<App>,
        driver: Arc<StubDriver>,
        store: Arc<MemoryStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(StubDriver::new());
        let store = Arc::new(MemoryStore::new());

        let mut config = Config::default();
        config.media.data_dir = dir.path().to_path_buf();
        config.media.backoff_base_secs = 0;
        config.media.terminate_grace_secs = 1;
        config.security.enc_key = Some("0123456789abcdef0123456789abcdef".to_string());

        let app = App::new(config, store.clone(), driver.clone()).unwrap();
        Fixture {
            app,
            driver,
            store,
            _dir: dir,
        }
    }

    async fn wait_online(app: &App, id: &Uuid) {
        for _ in 0..200 {
            if let Ok(camera) = app.get_camera(id).await {
                if camera.status == CameraStatus::Online {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("camera never came online");
    }

    #[tokio::test]
    async fn create_publishes_added_and_starts_supervisor() {
        let fx = fixture();
        let mut sub = fx.app.bus.subscribe();

        let camera = fx
            .app
            .create_camera(Camera::new("Gate", "rtsp://10.0.0.2/stream"), Some("pw"))
            .await
            .unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::CameraAdded);
        // Secrets never reach the bus
        assert!(event.payload["secret"].is_null());

        wait_online(&fx.app, &camera.id).await;
        assert_eq!(fx.driver.live_spawn_count(&camera.id), 1);

        // The stored row carries a sealed secret, not the password
        let stored = fx.store.get_camera(&camera.id).await.unwrap().unwrap();
        let sealed = stored.secret.unwrap();
        assert_ne!(sealed, "pw");
        assert_eq!(fx.app.vault.open(&sealed).unwrap(), "pw");
    }

    #[tokio::test]
    async fn invalid_camera_is_rejected() {
        let fx = fixture();
        let mut camera = Camera::new("Gate", "rtsp://10.0.0.2/stream");
        camera.recording.retention_days = 9999;
        let err = fx.app.create_camera(camera, None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn delete_cascade_stops_recording_first() {
        let fx = fixture();
        let camera = fx
            .app
            .create_camera(Camera::new("Gate", "rtsp://10.0.0.2/stream"), None)
            .await
            .unwrap();
        wait_online(&fx.app, &camera.id).await;

        let recording = fx.app.start_recording(&camera.id).await.unwrap();
        assert!(recording.is_active());

        for i in 0..5 {
            fx.store
                .put_anpr_event(&AnprEvent {
                    id: Uuid::new_v4(),
                    camera_id: camera.id,
                    timestamp: Utc::now(),
                    plate: format!("PLATE{:03}", i),
                    confidence: 0.9,
                    snapshot_path: PathBuf::from("/tmp/s.jpg"),
                    bbox: BoundingBox::default(),
                    detector_meta: None,
                })
                .await
                .unwrap();
        }

        let mut sub = fx.app.bus.subscribe();
        fx.app.delete_camera(&camera.id).await.unwrap();

        // Finalize strictly precedes the delete announcement
        let first = sub.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::RecordingStopped);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event_type, EventType::CameraDeleted);

        assert!(fx.store.get_camera(&camera.id).await.unwrap().is_none());
        assert!(fx
            .store
            .list_recordings(&RecordingFilter {
                camera_id: Some(camera.id),
                ..Default::default()
            })
            .await
            .unwrap()
            .is_empty());
        assert!(fx
            .store
            .list_anpr_events(&AnprFilter {
                camera_id: Some(camera.id),
                ..Default::default()
            })
            .await
            .unwrap()
            .is_empty());

        // Nothing else ever shows up for this camera
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn anpr_trigger_then_delete_leaves_no_trailing_events() {
        let fx = fixture();
        let mut camera = Camera::new("Gate", "rtsp://10.0.0.2/stream");
        camera.anpr.enabled = false;
        let camera = fx.app.create_camera(camera, None).await.unwrap();
        wait_online(&fx.app, &camera.id).await;

        // One-shot tick racing a delete must be drained before the
        // delete announcement goes out
        fx.app.trigger_anpr(&camera.id).await.unwrap();
        let mut sub = fx.app.bus.subscribe();
        fx.app.delete_camera(&camera.id).await.unwrap();

        assert_eq!(
            sub.recv().await.unwrap().event_type,
            EventType::CameraDeleted
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn delete_unknown_camera_is_not_found() {
        let fx = fixture();
        let err = fx.app.delete_camera(&Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_keeps_existing_secret_when_password_absent() {
        let fx = fixture();
        let camera = fx
            .app
            .create_camera(Camera::new("Gate", "rtsp://10.0.0.2/stream"), Some("pw"))
            .await
            .unwrap();
        wait_online(&fx.app, &camera.id).await;

        let mut updated = fx.store.get_camera(&camera.id).await.unwrap().unwrap();
        updated.name = "Gate East".to_string();
        let result = fx.app.update_camera(&camera.id, updated, None).await.unwrap();

        assert_eq!(result.name, "Gate East");
        assert_eq!(fx.app.vault.open(&result.secret.unwrap()).unwrap(), "pw");
    }

    #[tokio::test]
    async fn stats_count_rows() {
        let fx = fixture();
        let camera = fx
            .app
            .create_camera(Camera::new("Gate", "rtsp://10.0.0.2/stream"), None)
            .await
            .unwrap();
        wait_online(&fx.app, &camera.id).await;
        fx.app.start_recording(&camera.id).await.unwrap();

        let stats = fx.app.system_stats().await.unwrap();
        assert_eq!(stats.total_cameras, 1);
        assert_eq!(stats.online_cameras, 1);
        assert_eq!(stats.active_recordings, 1);
    }
}
