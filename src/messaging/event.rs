use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Event topics published on the bus
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    CameraAdded,
    CameraUpdated,
    CameraDeleted,
    CameraStatus,
    RecordingStarted,
    RecordingStopped,
    AnprEvent,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CameraAdded => write!(f, "camera-added"),
            Self::CameraUpdated => write!(f, "camera-updated"),
            Self::CameraDeleted => write!(f, "camera-deleted"),
            Self::CameraStatus => write!(f, "camera-status"),
            Self::RecordingStarted => write!(f, "recording-started"),
            Self::RecordingStopped => write!(f, "recording-stopped"),
            Self::AnprEvent => write!(f, "anpr-event"),
        }
    }
}

/// Event message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique event ID
    pub id: Uuid,
    /// Event topic
    pub event_type: EventType,
    /// Source camera, when the event concerns one
    pub source_id: Option<Uuid>,
    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Event data payload
    pub payload: serde_json::Value,
}

impl EventMessage {
    /// Create a new event message
    pub fn new<T: Serialize>(
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            event_type,
            source_id,
            timestamp: chrono::Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }
}
