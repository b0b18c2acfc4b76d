use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::db::models::anpr_models::{normalize_plate, BoundingBox};
use crate::error::Error;

/// One candidate plate region from the detector
#[derive(Debug, Clone, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// External plate region detector
#[async_trait]
pub trait PlateDetector: Send + Sync {
    async fn detect(&self, frame: &Path) -> Result<Vec<Detection>>;
}

/// External plate text extractor
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the normalized plate text, or `None` when the region holds
    /// no readable plate.
    async fn extract(&self, frame: &Path, bbox: BoundingBox) -> Result<Option<String>>;
}

/// Detector backed by an external inference binary.
///
/// The binary is invoked as `<binary> <frame-path>` and prints a JSON array
/// of `{"bbox": {"x","y","w","h"}, "confidence": f64}` objects on stdout.
pub struct CommandDetector {
    binary: PathBuf,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }
}

#[async_trait]
impl PlateDetector for CommandDetector {
    async fn detect(&self, frame: &Path) -> Result<Vec<Detection>> {
        let output = run_inference(&self.binary, &[frame.as_os_str().to_os_string()], self.timeout)
            .await?;
        let detections: Vec<Detection> = serde_json::from_slice(&output)
            .map_err(|e| Error::Inference(format!("detector output is not valid JSON: {}", e)))?;
        debug!(
            "Detector found {} candidate region(s) in {}",
            detections.len(),
            frame.display()
        );
        Ok(detections)
    }
}

/// Extractor backed by an external inference binary.
///
/// Invoked as `<binary> <frame-path> <x> <y> <w> <h>`; stdout carries the
/// raw plate text, or `none` when unreadable.
pub struct CommandExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl CommandExtractor {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }
}

#[async_trait]
impl TextExtractor for CommandExtractor {
    async fn extract(&self, frame: &Path, bbox: BoundingBox) -> Result<Option<String>> {
        let args = [
            frame.as_os_str().to_os_string(),
            bbox.x.to_string().into(),
            bbox.y.to_string().into(),
            bbox.w.to_string().into(),
            bbox.h.to_string().into(),
        ];
        let output = run_inference(&self.binary, &args, self.timeout).await?;
        let raw = String::from_utf8_lossy(&output).trim().to_string();
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        Ok(normalize_plate(&raw))
    }
}

async fn run_inference(
    binary: &Path,
    args: &[std::ffi::OsString],
    limit: Duration,
) -> Result<Vec<u8>> {
    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Inference(format!("failed to spawn {}: {}", binary.display(), e)))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(output) => {
            output.map_err(|e| Error::Inference(format!("inference wait failed: {}", e)))?
        }
        Err(_) => {
            return Err(
                Error::Inference(format!("inference timed out after {:?}", limit)).into(),
            )
        }
    };

    if !output.status.success() {
        return Err(Error::Inference(format!(
            "{} exited with {}",
            binary.display(),
            output.status
        ))
        .into());
    }
    Ok(output.stdout)
}

/// Inert detector used when no inference binary is configured. Tests feed
/// it scripted detections.
#[derive(Default)]
pub struct StubDetector {
    pub detections: Mutex<Vec<Detection>>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_detections(&self, detections: Vec<Detection>) {
        *self.detections.lock().unwrap() = detections;
    }
}

#[async_trait]
impl PlateDetector for StubDetector {
    async fn detect(&self, _frame: &Path) -> Result<Vec<Detection>> {
        Ok(self.detections.lock().unwrap().clone())
    }
}

/// Inert extractor counterpart to [`StubDetector`].
#[derive(Default)]
pub struct StubExtractor {
    pub plate: Mutex<Option<String>>,
}

impl StubExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_plate(&self, plate: Option<&str>) {
        *self.plate.lock().unwrap() = plate.map(str::to_string);
    }
}

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, _frame: &Path, _bbox: BoundingBox) -> Result<Option<String>> {
        let raw = self.plate.lock().unwrap().clone();
        Ok(raw.as_deref().and_then(normalize_plate))
    }
}
