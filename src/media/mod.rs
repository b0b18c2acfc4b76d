use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

pub mod ffmpeg;
#[cfg(test)]
pub mod stub;

pub use ffmpeg::FfmpegDriver;

/// Terminal outcome of a media child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineExit {
    /// Process exit code; `None` when killed by signal or lost
    pub code: Option<i32>,
}

impl PipelineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The watcher went away without reporting an exit.
    pub(crate) fn disconnected() -> Self {
        Self { code: None }
    }
}

/// Current state of a pipeline as seen through its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Running,
    Exited(PipelineExit),
}

/// Outcome of waiting for a live pipeline to produce its first playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    Ready,
    Exited(PipelineExit),
}

pub(crate) enum HandleControl {
    Terminate {
        grace: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Owned handle to one media child process.
///
/// The handle is the only way to observe or stop the child; dropping it
/// tears the child down. Raw pids never cross task boundaries.
pub struct PipelineHandle {
    control: mpsc::Sender<HandleControl>,
    exit: watch::Receiver<Option<PipelineExit>>,
    ready: watch::Receiver<bool>,
}

/// Watcher-side endpoints backing a [`PipelineHandle`].
pub(crate) struct HandleParts {
    pub control_rx: mpsc::Receiver<HandleControl>,
    pub exit_tx: watch::Sender<Option<PipelineExit>>,
    pub ready_tx: watch::Sender<bool>,
}

impl PipelineHandle {
    pub(crate) fn channel() -> (Self, HandleParts) {
        let (control_tx, control_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = watch::channel(false);
        (
            Self {
                control: control_tx,
                exit: exit_rx,
                ready: ready_rx,
            },
            HandleParts {
                control_rx,
                exit_tx,
                ready_tx,
            },
        )
    }

    /// Non-blocking status query.
    pub fn status(&self) -> PipelineStatus {
        match *self.exit.borrow() {
            Some(exit) => PipelineStatus::Exited(exit),
            None => PipelineStatus::Running,
        }
    }

    /// Await the child's exit.
    pub async fn wait(&mut self) -> PipelineExit {
        loop {
            let current = *self.exit.borrow();
            if let Some(exit) = current {
                return exit;
            }
            if self.exit.changed().await.is_err() {
                return PipelineExit::disconnected();
            }
        }
    }

    /// Await either readiness (first playlist written) or an early exit.
    pub async fn wait_ready(&mut self) -> ReadyOutcome {
        let mut ready_open = true;
        loop {
            let exited = *self.exit.borrow();
            if let Some(exit) = exited {
                return ReadyOutcome::Exited(exit);
            }
            if *self.ready.borrow() {
                return ReadyOutcome::Ready;
            }
            tokio::select! {
                changed = self.exit.changed() => {
                    if changed.is_err() {
                        return ReadyOutcome::Exited(PipelineExit::disconnected());
                    }
                }
                changed = self.ready.changed(), if ready_open => {
                    if changed.is_err() {
                        ready_open = false;
                    }
                }
            }
        }
    }

    /// Request a graceful stop; after `grace` the child is force-killed.
    ///
    /// Idempotent: returns normally when the child already exited.
    pub async fn terminate(&self, grace: Duration) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .control
            .send(HandleControl::Terminate {
                grace,
                done: done_tx,
            })
            .await
            .is_err()
        {
            // Watcher already finished
            return;
        }
        let _ = done_rx.await;
    }
}

/// Transcoder process orchestration.
///
/// Every operation takes a fully resolved ingress URL (credentials already
/// inlined). The driver spawns and tracks children but never restarts them;
/// failures surface through the handle's exit future to the owning
/// supervisor.
#[async_trait]
pub trait TranscoderDriver: Send + Sync {
    /// Start the rolling HLS live pipeline for a camera.
    async fn start_live_segmenter(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
    ) -> Result<PipelineHandle>;

    /// Start writing a single recording file. The caller pre-creates the
    /// destination directory.
    async fn start_recording(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
        output: &Path,
    ) -> Result<PipelineHandle>;

    /// Grab one frame into `output`; resolves once the frame is on disk.
    async fn take_snapshot(&self, camera_id: &Uuid, ingress_url: &str, output: &Path)
        -> Result<()>;

    /// Like snapshot but independent of any running pipeline; used by ANPR.
    async fn extract_frame(
        &self,
        ingress_url: &str,
        output: &Path,
        timeout: Duration,
    ) -> Result<()>;
}
