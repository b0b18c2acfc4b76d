use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::HealthConfig;
use crate::db::models::{Camera, CameraStatus};
use crate::db::MetadataStore;
use crate::messaging::{EventBus, EventType};
use crate::supervisor::SupervisorRegistry;

const DEFAULT_RTSP_PORT: u16 = 554;

/// Periodic RTSP reachability prober.
///
/// One long-lived task for all cameras. Each tick derives online/offline
/// per camera from a TCP connect against the ingress endpoint; the probe is
/// hard-bounded so a dead host can never stall the loop. Status changes are
/// written back and published as `camera-status`; an offline-to-online flip
/// nudges the camera's supervisor awake.
pub struct HealthProber {
    config: HealthConfig,
    store: Arc<dyn MetadataStore>,
    bus: EventBus,
    registry: SupervisorRegistry,
}

impl HealthProber {
    pub fn new(
        config: HealthConfig,
        store: Arc<dyn MetadataStore>,
        bus: EventBus,
        registry: SupervisorRegistry,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            registry,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        info!(
            "Health prober started (interval {} s)",
            self.config.interval_secs
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
        info!("Health prober stopped");
    }

    /// One pass over every stored camera.
    pub async fn sweep(&self) {
        let cameras = match self.store.list_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                warn!("Health sweep could not list cameras: {}", e);
                return;
            }
        };

        for camera in cameras {
            let result = self.probe(&camera.ingress_url).await;
            self.apply(&camera, result).await;
        }
    }

    /// Lightweight reachability check: TCP connect plus one RTSP OPTIONS
    /// round trip, all within the per-probe deadline. A timeout counts as
    /// offline.
    ///
    /// Any `RTSP/` status line passes, 401 included: an auth challenge
    /// still proves a live RTSP endpoint.
    async fn probe(&self, ingress_url: &str) -> Result<(), String> {
        let url =
            Url::parse(ingress_url).map_err(|e| format!("unparseable ingress URL: {}", e))?;
        let host = url
            .host_str()
            .ok_or_else(|| "ingress URL has no host".to_string())?;
        let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);

        let exchange = async {
            let mut stream = TcpStream::connect((host, port))
                .await
                .map_err(|e| format!("connect failed: {}", e))?;

            let request = format!(
                "OPTIONS {} RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: argus-vms\r\n\r\n",
                ingress_url
            );
            stream
                .write_all(request.as_bytes())
                .await
                .map_err(|e| format!("options write failed: {}", e))?;

            let mut buf = [0u8; 512];
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| format!("options read failed: {}", e))?;
            let response = String::from_utf8_lossy(&buf[..n]);
            if response.starts_with("RTSP/") {
                Ok(())
            } else {
                Err(format!(
                    "endpoint did not speak RTSP: {:?}",
                    response.lines().next().unwrap_or("")
                ))
            }
        };

        match timeout(self.config.probe_timeout(), exchange).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "probe timed out after {:?}",
                self.config.probe_timeout()
            )),
        }
    }

    async fn apply(&self, camera: &Camera, result: Result<(), String>) {
        let (derived, error) = match result {
            Ok(()) => (CameraStatus::Online, None),
            Err(reason) => (CameraStatus::Offline, Some(reason)),
        };

        if camera.status == derived {
            return;
        }

        // The camera may have been deleted while we were probing; never
        // emit events for a gone camera
        match self.store.get_camera(&camera.id).await {
            Ok(Some(_)) => {}
            _ => return,
        }

        let last_seen = (derived == CameraStatus::Online).then(Utc::now);
        if let Err(e) = self
            .store
            .update_camera_status(&camera.id, derived, last_seen, None)
            .await
        {
            warn!("Camera {}: status write failed: {}", camera.id, e);
            return;
        }

        debug!(
            "Camera {}: {} -> {}",
            camera.id, camera.status, derived
        );
        let _ = self.bus.publish(
            EventType::CameraStatus,
            Some(camera.id),
            json!({
                "id": camera.id,
                "status": derived,
                "observed": camera.observed,
                "error": error,
            }),
        );

        // A camera coming back reachable gets its supervisor going again
        // (no-op unless it sits in Idle or Failed)
        if derived == CameraStatus::Online {
            if let Some(handle) = self.registry.get(&camera.id).await {
                if let Err(e) = handle.start().await {
                    warn!("Camera {}: start request failed: {}", camera.id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::messaging::Subscription;
    use tokio::net::TcpListener;

    struct Fixture {
        prober: HealthProber,
        store: Arc<MemoryStore>,
        sub: Subscription,
    }

    fn fixture(store: Arc<MemoryStore>) -> Fixture {
        let bus = EventBus::new(64);
        let sub = bus.subscribe();
        let prober = HealthProber::new(
            HealthConfig {
                interval_secs: 30,
                probe_timeout_secs: Some(1),
            },
            store.clone(),
            bus,
            SupervisorRegistry::new(),
        );
        Fixture { prober, store, sub }
    }

    /// Minimal RTSP endpoint: answers every connection's OPTIONS with 200.
    async fn spawn_rtsp_responder() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(
                            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY\r\n\r\n",
                        )
                        .await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn reachable_camera_goes_online_once() {
        let port = spawn_rtsp_responder().await;

        let store = Arc::new(MemoryStore::new());
        let camera = Camera::new("Gate", &format!("rtsp://127.0.0.1:{}/stream", port));
        store.put_camera(&camera).await.unwrap();
        let mut fx = fixture(store);

        fx.prober.sweep().await;
        let event = fx.sub.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::CameraStatus);
        assert_eq!(event.payload["status"], "online");

        let stored = fx.store.get_camera(&camera.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CameraStatus::Online);
        assert!(stored.last_seen.is_some());

        // Still reachable: derived equals recorded, no second event
        fx.prober.sweep().await;
        assert!(fx.sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn unreachable_camera_emits_exactly_one_offline_event() {
        let store = Arc::new(MemoryStore::new());
        // Reserved TEST-NET-1 address, nothing listens there
        let mut camera = Camera::new("Gate", "rtsp://192.0.2.1:554/stream");
        camera.status = CameraStatus::Online;
        store.put_camera(&camera).await.unwrap();
        let mut fx = fixture(store);

        fx.prober.sweep().await;
        let event = fx.sub.recv().await.unwrap();
        assert_eq!(event.payload["status"], "offline");
        assert!(event.payload["error"].is_string());

        // Offline twice in a row: one event only
        fx.prober.sweep().await;
        assert!(fx.sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn non_rtsp_endpoint_counts_as_offline() {
        // Accepts TCP but answers with HTTP, not RTSP
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await;
            }
        });

        let store = Arc::new(MemoryStore::new());
        let mut camera = Camera::new("Gate", &format!("rtsp://127.0.0.1:{}/stream", port));
        camera.status = CameraStatus::Online;
        store.put_camera(&camera).await.unwrap();
        let mut fx = fixture(store);

        fx.prober.sweep().await;
        let event = fx.sub.recv().await.unwrap();
        assert_eq!(event.payload["status"], "offline");
    }

    #[tokio::test]
    async fn deleted_camera_gets_no_events() {
        let port = spawn_rtsp_responder().await;

        let store = Arc::new(MemoryStore::new());
        let camera = Camera::new("Gate", &format!("rtsp://127.0.0.1:{}/stream", port));
        let mut fx = fixture(store.clone());

        // Probe runs against a snapshot listing that still has the camera,
        // but the row is gone by the time the result lands
        store.put_camera(&camera).await.unwrap();
        let listed = store.list_cameras().await.unwrap();
        store.delete_camera(&camera.id).await.unwrap();
        fx.prober.apply(&listed[0], Ok(())).await;

        assert!(fx.sub.try_recv().is_none());
    }
}
