use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// License plate recognition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnprEvent {
    pub id: Uuid,
    pub camera_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Normalized plate text: uppercase alphanumeric, length >= 3
    pub plate: String,
    pub confidence: f64,
    pub snapshot_path: PathBuf,
    pub bbox: BoundingBox,
    /// Opaque detector payload, stored as-is
    pub detector_meta: Option<serde_json::Value>,
}

/// Plate bounding box in source pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Normalize raw extractor output to the canonical plate form.
///
/// Strips everything that is not alphanumeric and uppercases the rest.
/// Returns `None` when fewer than 3 characters survive.
pub fn normalize_plate(raw: &str) -> Option<String> {
    let plate: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if plate.len() >= 3 {
        Some(plate)
    } else {
        None
    }
}
