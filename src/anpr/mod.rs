use anyhow::Result;
use chrono::Utc;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod dedup;
pub mod inference;

pub use dedup::DedupFilter;
pub use inference::{
    CommandDetector, CommandExtractor, Detection, PlateDetector, StubDetector, StubExtractor,
    TextExtractor,
};

use crate::config::AnprConfig;
use crate::db::models::{AnprEvent, AnprPolicy};
use crate::db::MetadataStore;
use crate::media::TranscoderDriver;
use crate::messaging::{EventBus, EventType};
use crate::utils::MediaLayout;

/// Inference strategies plus their shared configuration, selected once at
/// startup and shared by all workers.
pub struct AnprContext {
    pub detector: Arc<dyn PlateDetector>,
    pub extractor: Arc<dyn TextExtractor>,
    pub config: AnprConfig,
}

impl AnprContext {
    /// Wire the real command-line strategies when binaries are configured,
    /// the inert stubs otherwise.
    pub fn from_config(config: AnprConfig) -> Self {
        let limit = Duration::from_secs(config.inference_timeout_secs);
        let detector: Arc<dyn PlateDetector> = match &config.detector_path {
            Some(path) => Arc::new(CommandDetector::new(path.clone(), limit)),
            None => Arc::new(StubDetector::new()),
        };
        let extractor: Arc<dyn TextExtractor> = match &config.extractor_path {
            Some(path) => Arc::new(CommandExtractor::new(path.clone(), limit)),
            None => Arc::new(StubExtractor::new()),
        };
        Self {
            detector,
            extractor,
            config,
        }
    }
}

/// Control handle to one camera's ANPR worker
pub struct AnprHandle {
    cancel: CancellationToken,
    trigger: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl AnprHandle {
    /// Request a one-shot tick outside the sampling interval.
    pub fn trigger(&self) -> bool {
        self.trigger.try_send(()).is_ok()
    }

    /// Cancel the worker and wait for the in-flight tick to drain.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(20), self.join).await;
    }
}

/// Per-camera sampling and two-stage inference loop.
pub struct AnprWorker {
    camera_id: Uuid,
    ingress_url: String,
    policy: AnprPolicy,
    ctx: Arc<AnprContext>,
    driver: Arc<dyn TranscoderDriver>,
    store: Arc<dyn MetadataStore>,
    bus: EventBus,
    layout: MediaLayout,
    dedup: DedupFilter,
}

impl AnprWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: Uuid,
        ingress_url: String,
        policy: AnprPolicy,
        ctx: Arc<AnprContext>,
        driver: Arc<dyn TranscoderDriver>,
        store: Arc<dyn MetadataStore>,
        bus: EventBus,
        layout: MediaLayout,
    ) -> Self {
        Self {
            camera_id,
            ingress_url,
            policy,
            ctx,
            driver,
            store,
            bus,
            layout,
            dedup: DedupFilter::new(),
        }
    }

    /// Start the periodic loop in its own task.
    pub fn spawn(self) -> AnprHandle {
        let cancel = CancellationToken::new();
        let (trigger_tx, trigger_rx) = mpsc::channel(8);
        let join = tokio::spawn(self.run(cancel.clone(), trigger_rx));
        AnprHandle {
            cancel,
            trigger: trigger_tx,
            join,
        }
    }

    /// Run exactly one tick and return; used for explicit triggers on
    /// cameras without a periodic worker. The caller keeps the token so
    /// the tick can be drained on camera teardown.
    pub async fn run_once(mut self, cancel: CancellationToken) {
        self.run_tick(&cancel).await;
    }

    async fn run(mut self, cancel: CancellationToken, mut trigger_rx: mpsc::Receiver<()>) {
        // Declared sampling semantics: N frames maps to N seconds
        let period = Duration::from_millis(self.policy.sample_every_n_frames.max(1) as u64 * 1000);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "ANPR worker started for camera {} (period {:?})",
            self.camera_id, period
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_tick(&cancel).await;
                }
                triggered = trigger_rx.recv() => {
                    match triggered {
                        Some(()) => self.run_tick(&cancel).await,
                        None => break,
                    }
                }
            }
        }

        debug!("ANPR worker stopped for camera {}", self.camera_id);
    }

    /// One sampling tick: extract a frame, run both inference stages,
    /// filter, persist, publish. The temporary frame is removed on every
    /// exit path.
    pub async fn run_tick(&mut self, cancel: &CancellationToken) {
        let frame = self.layout.temp_frame_path(&self.camera_id, Utc::now());
        let result = self.process_frame(&frame, cancel).await;
        let _ = tokio::fs::remove_file(&frame).await;

        match result {
            Ok(0) => {}
            Ok(n) => debug!("Camera {}: {} plate read(s) emitted", self.camera_id, n),
            // One failed tick is not retried; the loop carries on
            Err(e) => warn!("ANPR tick failed for camera {}: {}", self.camera_id, e),
        }
    }

    async fn process_frame(&mut self, frame: &Path, cancel: &CancellationToken) -> Result<usize> {
        self.driver
            .extract_frame(
                &self.ingress_url,
                frame,
                Duration::from_secs(self.ctx.config.frame_timeout_secs),
            )
            .await?;

        let detections = self.ctx.detector.detect(frame).await?;
        let mut emitted = 0;

        for detection in detections {
            let plate = match self.ctx.extractor.extract(frame, detection.bbox).await? {
                Some(plate) => plate,
                None => continue,
            };
            if detection.confidence < self.policy.confidence_threshold {
                continue;
            }
            let now_ms = Utc::now().timestamp_millis().max(0) as u64;
            if !self.dedup.admit(&plate, now_ms) {
                continue;
            }
            // Cancelled mid-inference: finish the tick but never emit a
            // torn event
            if cancel.is_cancelled() {
                return Ok(emitted);
            }

            let snapshot = self.layout.snapshot_path(&self.camera_id, Utc::now());
            if let Some(parent) = snapshot.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(frame, &snapshot).await?;

            let event = AnprEvent {
                id: Uuid::new_v4(),
                camera_id: self.camera_id,
                timestamp: Utc::now(),
                plate,
                confidence: detection.confidence,
                snapshot_path: snapshot,
                bbox: detection.bbox,
                detector_meta: detection.meta.clone(),
            };
            let stored = self.store.put_anpr_event(&event).await?;
            self.bus
                .publish(EventType::AnprEvent, Some(self.camera_id), &stored)?;
            emitted += 1;
        }

        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::BoundingBox;
    use crate::db::AnprFilter;
    use crate::media::stub::StubDriver;

    struct Fixture {
        worker: AnprWorker,
        store: Arc<MemoryStore>,
        detector: Arc<StubDetector>,
        extractor: Arc<StubExtractor>,
        bus: EventBus,
        camera_id: Uuid,
        _dir: tempfile::TempDir,
    }

    fn fixture(threshold: f64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let detector = Arc::new(StubDetector::new());
        let extractor = Arc::new(StubExtractor::new());
        let bus = EventBus::new(64);
        let camera_id = Uuid::new_v4();

        let ctx = Arc::new(AnprContext {
            detector: detector.clone(),
            extractor: extractor.clone(),
            config: AnprConfig {
                enabled: true,
                detector_path: None,
                extractor_path: None,
                frame_timeout_secs: 5,
                inference_timeout_secs: 15,
            },
        });

        let worker = AnprWorker::new(
            camera_id,
            "rtsp://10.0.0.2/stream".into(),
            AnprPolicy {
                enabled: true,
                sample_every_n_frames: 1,
                confidence_threshold: threshold,
            },
            ctx,
            Arc::new(StubDriver::new()),
            store.clone(),
            bus.clone(),
            MediaLayout::new(dir.path()),
        );

        Fixture {
            worker,
            store,
            detector,
            extractor,
            bus,
            camera_id,
            _dir: dir,
        }
    }

    fn detection(confidence: f64) -> Detection {
        Detection {
            bbox: BoundingBox {
                x: 10,
                y: 20,
                w: 120,
                h: 40,
            },
            confidence,
            meta: None,
        }
    }

    #[tokio::test]
    async fn repeated_reads_within_window_emit_one_event() {
        let mut fx = fixture(0.8);
        fx.detector.set_detections(vec![detection(0.9)]);
        fx.extractor.set_plate(Some("ABC1234"));
        let mut sub = fx.bus.subscribe();

        let cancel = CancellationToken::new();
        for _ in 0..3 {
            fx.worker.run_tick(&cancel).await;
        }

        let events = fx
            .store
            .list_anpr_events(&AnprFilter::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plate, "ABC1234");
        assert_eq!(events[0].camera_id, fx.camera_id);

        let published = sub.recv().await.unwrap();
        assert_eq!(published.event_type, EventType::AnprEvent);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn low_confidence_reads_are_dropped() {
        let mut fx = fixture(0.8);
        fx.detector.set_detections(vec![detection(0.7)]);
        fx.extractor.set_plate(Some("ABC1234"));

        let cancel = CancellationToken::new();
        fx.worker.run_tick(&cancel).await;

        let events = fx
            .store
            .list_anpr_events(&AnprFilter::default())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn unreadable_region_is_skipped() {
        let mut fx = fixture(0.5);
        fx.detector.set_detections(vec![detection(0.9)]);
        fx.extractor.set_plate(None);

        let cancel = CancellationToken::new();
        fx.worker.run_tick(&cancel).await;

        assert_eq!(fx.store.count_anpr_events(None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn temp_frame_is_removed_even_on_failure() {
        let mut fx = fixture(0.8);
        let driver = Arc::new(StubDriver::new());
        driver
            .fail_extract
            .store(true, std::sync::atomic::Ordering::SeqCst);
        fx.worker.driver = driver;

        let cancel = CancellationToken::new();
        fx.worker.run_tick(&cancel).await;

        let temp_dir = fx.worker.layout.root().join("temp").join("anpr");
        let leftovers = std::fs::read_dir(&temp_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn cancelled_tick_suppresses_its_event() {
        let mut fx = fixture(0.8);
        fx.detector.set_detections(vec![detection(0.9)]);
        fx.extractor.set_plate(Some("ABC1234"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        fx.worker.run_tick(&cancel).await;

        assert_eq!(fx.store.count_anpr_events(None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_survives_the_tick() {
        let mut fx = fixture(0.5);
        fx.detector.set_detections(vec![detection(0.9)]);
        fx.extractor.set_plate(Some("XYZ9876"));

        let cancel = CancellationToken::new();
        fx.worker.run_tick(&cancel).await;

        let events = fx
            .store
            .list_anpr_events(&AnprFilter::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].snapshot_path.exists());
    }
}
