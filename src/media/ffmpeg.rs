use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::Error;
use crate::media::{HandleControl, HandleParts, PipelineExit, PipelineHandle, TranscoderDriver};
use crate::utils::MediaLayout;

/// ffmpeg-backed transcoder driver.
///
/// Spawns one ffmpeg child per operation and tracks it through a detached
/// watcher task. Graceful stop writes `q` to ffmpeg's stdin so open
/// containers get their trailers; after the grace period the child is
/// killed.
pub struct FfmpegDriver {
    binary: PathBuf,
    layout: MediaLayout,
    config: MediaConfig,
}

impl FfmpegDriver {
    pub fn new(config: MediaConfig) -> Self {
        let binary = config
            .ffmpeg_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));
        let layout = MediaLayout::new(config.data_dir.clone());
        Self {
            binary,
            layout,
            config,
        }
    }

    /// Verify the transcoder binary is runnable; called once at startup.
    pub async fn check_binary(&self) -> Result<()> {
        let status = Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "transcoder binary {} not runnable: {}",
                    self.binary.display(),
                    e
                ))
            })?;
        if !status.success() {
            return Err(Error::Config(format!(
                "transcoder binary {} exited with {}",
                self.binary.display(),
                status
            ))
            .into());
        }
        Ok(())
    }

    fn base_command(&self, ingress_url: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-rtsp_transport")
            .arg("tcp")
            .arg("-i")
            .arg(ingress_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_watched(
        &self,
        mut cmd: Command,
        ready_probe: Option<PathBuf>,
    ) -> Result<PipelineHandle> {
        let child = cmd
            .spawn()
            .map_err(|e| Error::Transcoder(format!("failed to spawn ffmpeg: {}", e)))?;

        let (handle, parts) = PipelineHandle::channel();
        tokio::spawn(watch_child(child, parts, ready_probe));
        Ok(handle)
    }

    /// One-shot operation: run to completion within `limit` and require
    /// that `output` exists afterwards.
    async fn run_one_shot(&self, mut cmd: Command, output: &Path, limit: Duration) -> Result<()> {
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Transcoder(format!("failed to spawn ffmpeg: {}", e)))?;

        let status = match timeout(limit, child.wait()).await {
            Ok(status) => {
                status.map_err(|e| Error::Transcoder(format!("ffmpeg wait failed: {}", e)))?
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(Error::Transcoder(format!(
                    "frame grab timed out after {:?}",
                    limit
                ))
                .into());
            }
        };

        if !status.success() {
            return Err(Error::Transcoder(format!("ffmpeg exited with {}", status)).into());
        }
        if !output.exists() {
            return Err(Error::Transcoder(format!(
                "ffmpeg reported success but {} is missing",
                output.display()
            ))
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl TranscoderDriver for FfmpegDriver {
    async fn start_live_segmenter(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
    ) -> Result<PipelineHandle> {
        let live_dir = self.layout.live_dir(camera_id);
        tokio::fs::create_dir_all(&live_dir).await?;

        let playlist = self.layout.live_playlist(camera_id);
        let mut cmd = self.base_command(ingress_url);
        cmd.arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg("veryfast")
            .arg("-tune")
            .arg("zerolatency")
            .arg("-c:a")
            .arg("aac")
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg(self.config.live_segment_secs.to_string())
            .arg("-hls_list_size")
            .arg(self.config.live_window.to_string())
            .arg("-hls_flags")
            .arg("delete_segments+program_date_time")
            .arg("-hls_segment_filename")
            .arg(self.layout.live_segment_pattern(camera_id))
            .arg(&playlist);

        debug!("Starting live segmenter for camera {}", camera_id);
        self.spawn_watched(cmd, Some(playlist))
    }

    async fn start_recording(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
        output: &Path,
    ) -> Result<PipelineHandle> {
        let mut cmd = self.base_command(ingress_url);
        cmd.arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("+faststart")
            .arg("-y")
            .arg(output);

        debug!(
            "Starting recording for camera {} at {}",
            camera_id,
            output.display()
        );
        self.spawn_watched(cmd, None)
    }

    async fn take_snapshot(
        &self,
        camera_id: &Uuid,
        ingress_url: &str,
        output: &Path,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut cmd = self.base_command(ingress_url);
        cmd.arg("-frames:v").arg("1").arg("-q:v").arg("2").arg("-y").arg(output);

        debug!("Taking snapshot for camera {}", camera_id);
        self.run_one_shot(
            cmd,
            output,
            Duration::from_secs(self.config.snapshot_timeout_secs),
        )
        .await
    }

    async fn extract_frame(
        &self,
        ingress_url: &str,
        output: &Path,
        limit: Duration,
    ) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut cmd = self.base_command(ingress_url);
        cmd.arg("-frames:v").arg("1").arg("-q:v").arg("2").arg("-y").arg(output);

        self.run_one_shot(cmd, output, limit).await
    }
}

/// Owns the child for its whole life: reports the exit, answers terminate
/// requests, and flags readiness once the playlist shows up on disk.
async fn watch_child(mut child: Child, mut parts: HandleParts, ready_probe: Option<PathBuf>) {
    let mut stdin = child.stdin.take();
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    let mut ready_sent = ready_probe.is_none();

    loop {
        tokio::select! {
            status = child.wait() => {
                let exit = match status {
                    Ok(s) => PipelineExit { code: s.code() },
                    Err(e) => {
                        warn!("Failed to reap media child: {}", e);
                        PipelineExit::disconnected()
                    }
                };
                let _ = parts.exit_tx.send(Some(exit));
                return;
            }
            control = parts.control_rx.recv() => {
                match control {
                    Some(HandleControl::Terminate { grace, done }) => {
                        if let Some(mut pipe) = stdin.take() {
                            let _ = pipe.write_all(b"q\n").await;
                            let _ = pipe.flush().await;
                        }
                        let exit = match timeout(grace, child.wait()).await {
                            Ok(Ok(s)) => PipelineExit { code: s.code() },
                            Ok(Err(_)) => PipelineExit::disconnected(),
                            Err(_) => {
                                let _ = child.start_kill();
                                match child.wait().await {
                                    Ok(s) => PipelineExit { code: s.code() },
                                    Err(_) => PipelineExit::disconnected(),
                                }
                            }
                        };
                        let _ = parts.exit_tx.send(Some(exit));
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        // Handle dropped: nobody can observe this child any
                        // more, take it down
                        let _ = child.start_kill();
                        let exit = match child.wait().await {
                            Ok(s) => PipelineExit { code: s.code() },
                            Err(_) => PipelineExit::disconnected(),
                        };
                        let _ = parts.exit_tx.send(Some(exit));
                        return;
                    }
                }
            }
            _ = poll.tick(), if !ready_sent => {
                if let Some(playlist) = &ready_probe {
                    if playlist.exists() {
                        ready_sent = true;
                        let _ = parts.ready_tx.send(true);
                    }
                }
            }
        }
    }
}
