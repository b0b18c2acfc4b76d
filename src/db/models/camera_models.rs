use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Camera model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: Uuid,
    pub name: String,
    pub location: Option<String>,
    /// RTSP ingress URL, without inline credentials
    pub ingress_url: String,
    pub username: Option<String>,
    /// Vault ciphertext of the camera password; never returned by the API
    pub secret: Option<String>,
    pub tags: Vec<String>,
    pub protocols: Protocols,
    pub grid: GridPosition,
    pub recording: RecordingPolicy,
    pub anpr: AnprPolicy,
    pub status: CameraStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub observed: StreamMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Protocol enablement flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocols {
    /// Serve the segmented live playlist for this camera
    pub hls: bool,
    /// Allow snapshot extraction
    pub snapshots: bool,
}

impl Default for Protocols {
    fn default() -> Self {
        Self {
            hls: true,
            snapshots: true,
        }
    }
}

/// Position of the camera tile in the viewing grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: u16,
    pub column: u16,
    pub size: u16,
}

/// Recording policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingPolicy {
    pub mode: RecordingMode,
    pub segment_seconds: u32,
    pub retention_days: u32,
}

impl Default for RecordingPolicy {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Manual,
            segment_seconds: 30,
            retention_days: 30,
        }
    }
}

/// Recording mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    Off,
    Manual,
    Continuous,
}

/// ANPR policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnprPolicy {
    pub enabled: bool,
    pub sample_every_n_frames: u32,
    pub confidence_threshold: f64,
}

impl Default for AnprPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_every_n_frames: 5,
            confidence_threshold: 0.7,
        }
    }
}

/// Observed camera status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Offline,
    Online,
    Reconnecting,
    Error,
}

impl fmt::Display for CameraStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Online => write!(f, "online"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Stream metadata observed by the prober
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub fps: Option<f64>,
    pub bitrate_kbps: Option<u32>,
    pub resolution: Option<String>,
}

impl Camera {
    pub fn new(name: &str, ingress_url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            location: None,
            ingress_url: ingress_url.to_string(),
            username: None,
            secret: None,
            tags: Vec::new(),
            protocols: Protocols::default(),
            grid: GridPosition::default(),
            recording: RecordingPolicy::default(),
            anpr: AnprPolicy::default(),
            status: CameraStatus::Offline,
            last_seen: None,
            observed: StreamMeta::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate the camera against the allowed attribute ranges.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("camera name must not be empty".into()));
        }
        if !self.ingress_url.starts_with("rtsp://") {
            return Err(Error::Validation(format!(
                "ingress URL must be rtsp://, got {}",
                self.ingress_url
            )));
        }
        if !(1..=60).contains(&self.recording.segment_seconds) {
            return Err(Error::Validation(format!(
                "segment_seconds must be within 1..=60, got {}",
                self.recording.segment_seconds
            )));
        }
        if !(1..=365).contains(&self.recording.retention_days) {
            return Err(Error::Validation(format!(
                "retention_days must be within 1..=365, got {}",
                self.recording.retention_days
            )));
        }
        if !(1..=30).contains(&self.anpr.sample_every_n_frames) {
            return Err(Error::Validation(format!(
                "sample_every_n_frames must be within 1..=30, got {}",
                self.anpr.sample_every_n_frames
            )));
        }
        if !(0.1..=1.0).contains(&self.anpr.confidence_threshold) {
            return Err(Error::Validation(format!(
                "confidence_threshold must be within 0.1..=1.0, got {}",
                self.anpr.confidence_threshold
            )));
        }
        Ok(())
    }

    /// Username masked for API responses (`op***`).
    pub fn masked_username(&self) -> Option<String> {
        self.username.as_ref().map(|u| {
            let visible: String = u.chars().take(2).collect();
            format!("{}***", visible)
        })
    }

    /// Whether a configuration change requires the live pipeline to restart.
    pub fn requires_restart(&self, updated: &Camera) -> bool {
        self.ingress_url != updated.ingress_url || self.protocols != updated.protocols
    }

    /// Copy safe for API responses and bus payloads: the sealed secret is
    /// dropped and the username masked.
    pub fn sanitized(&self) -> Camera {
        let mut camera = self.clone();
        camera.username = self.masked_username();
        camera.secret = None;
        camera
    }
}
