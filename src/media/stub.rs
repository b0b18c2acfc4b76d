//! Scriptable transcoder used by supervisor and ANPR tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Error;
use crate::media::{HandleControl, PipelineExit, PipelineHandle, TranscoderDriver};

/// Kind of media child process, as recorded by the stub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    LiveSegmenter,
    Recording,
    Snapshot,
    FrameExtract,
}

#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub kind: PipelineKind,
    pub camera_id: Option<Uuid>,
    pub ingress_url: String,
    pub output: Option<PathBuf>,
}

/// In-process stand-in for the ffmpeg driver. Pipelines are plain tasks
/// that idle until terminated or crashed by the test.
#[derive(Default)]
pub struct StubDriver {
    pub spawns: Mutex<Vec<SpawnRecord>>,
    injectors: Mutex<HashMap<(Uuid, &'static str), mpsc::UnboundedSender<PipelineExit>>>,
    pub fail_spawn_live: AtomicBool,
    pub fail_extract: AtomicBool,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(
        &self,
        kind: PipelineKind,
        slot: &'static str,
        camera_id: Uuid,
        ingress_url: &str,
        output: Option<PathBuf>,
    ) -> PipelineHandle {
        self.spawns.lock().unwrap().push(SpawnRecord {
            kind,
            camera_id: Some(camera_id),
            ingress_url: ingress_url.to_string(),
            output,
        });

        let (handle, mut parts) = PipelineHandle::channel();
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel();
        self.injectors
            .lock()
            .unwrap()
            .insert((camera_id, slot), inject_tx);

        // Live pipelines report readiness right away
        let _ = parts.ready_tx.send(true);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    injected = inject_rx.recv() => {
                        let exit = injected.unwrap_or(PipelineExit { code: Some(1) });
                        let _ = parts.exit_tx.send(Some(exit));
                        return;
                    }
                    control = parts.control_rx.recv() => {
                        match control {
                            Some(HandleControl::Terminate { done, .. }) => {
                                let _ = parts.exit_tx.send(Some(PipelineExit { code: Some(0) }));
                                let _ = done.send(());
                                return;
                            }
                            None => {
                                let _ = parts.exit_tx.send(Some(PipelineExit { code: Some(0) }));
                                return;
                            }
                        }
                    }
                }
            }
        });

        handle
    }

    /// Make the live child of `camera_id` exit with a failure.
    pub fn crash_live(&self, camera_id: &Uuid) {
        if let Some(tx) = self.injectors.lock().unwrap().get(&(*camera_id, "live")) {
            let _ = tx.send(PipelineExit { code: Some(1) });
        }
    }

    /// Make the record child of `camera_id` exit with a failure.
    pub fn crash_record(&self, camera_id: &Uuid) {
        if let Some(tx) = self.injectors.lock().unwrap().get(&(*camera_id, "record")) {
            let _ = tx.send(PipelineExit { code: Some(1) });
        }
    }

    pub fn live_spawn_count(&self, camera_id: &Uuid) -> usize {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.kind == PipelineKind::LiveSegmenter && s.camera_id == Some(*camera_id))
            .count()
    }

    pub fn record_spawn_count(&self, camera_id: &Uuid) -> usize {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.kind == PipelineKind::Recording && s.camera_id == Some(*camera_id))
            .count()
    }

    pub fn last_live_url(&self, camera_id: &Uuid) -> Option<String> {
        self.spawns
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.kind == PipelineKind::LiveSegmenter && s.camera_id == Some(*camera_id))
            .map(|s| s.ingress_url.clone())
    }
}

#[async_trait]
impl TranscoderDriver for StubDriver {
    async fn start_live_segmenter(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
    ) -> Result<PipelineHandle> {
        if self.fail_spawn_live.load(Ordering::SeqCst) {
            return Err(Error::Transcoder("stub: live spawn refused".into()).into());
        }
        Ok(self.track(PipelineKind::LiveSegmenter, "live", *camera_id, ingress_url, None))
    }

    async fn start_recording(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
        output: &Path,
    ) -> Result<PipelineHandle> {
        std::fs::create_dir_all(output.parent().unwrap_or(Path::new("/tmp")))?;
        std::fs::write(output, b"stub-recording")?;
        Ok(self.track(
            PipelineKind::Recording,
            "record",
            *camera_id,
            ingress_url,
            Some(output.to_path_buf()),
        ))
    }

    async fn take_snapshot(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
        output: &Path,
    ) -> Result<()> {
        self.spawns.lock().unwrap().push(SpawnRecord {
            kind: PipelineKind::Snapshot,
            camera_id: Some(*camera_id),
            ingress_url: ingress_url.to_string(),
            output: Some(output.to_path_buf()),
        });
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, b"stub-jpeg")?;
        Ok(())
    }

    async fn extract_frame(
        &self,
        ingress_url: &str,
        output: &Path,
        _timeout: Duration,
    ) -> Result<()> {
        if self.fail_extract.load(Ordering::SeqCst) {
            return Err(Error::Transcoder("stub: frame extract refused".into()).into());
        }
        self.spawns.lock().unwrap().push(SpawnRecord {
            kind: PipelineKind::FrameExtract,
            camera_id: None,
            ingress_url: ingress_url.to_string(),
            output: Some(output.to_path_buf()),
        });
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, b"stub-frame")?;
        Ok(())
    }
}
