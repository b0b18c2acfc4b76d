pub mod anpr_models;
pub mod camera_models;
pub mod recording_models;
pub mod user_models;

pub use anpr_models::{AnprEvent, BoundingBox};
pub use camera_models::{
    AnprPolicy, Camera, CameraStatus, GridPosition, Protocols, RecordingMode, RecordingPolicy,
    StreamMeta,
};
pub use recording_models::Recording;
pub use user_models::{AuthToken, LoginCredentials, User, UserRole};
