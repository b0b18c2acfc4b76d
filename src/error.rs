use thiserror::Error;

/// Error taxonomy for the whole system.
///
/// Transient errors are absorbed inside the component they originate in;
/// only `NotFound`, `Conflict` and `Validation` are surfaced through the
/// control API.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already recording camera {0}")]
    AlreadyRecording(uuid::Uuid),

    #[error("No active recording for camera {0}")]
    NotRecording(uuid::Uuid),

    #[error("Camera {0} is not online")]
    Unavailable(uuid::Uuid),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transcoder error: {0}")]
    Transcoder(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Recover the typed error from an `anyhow` chain, defaulting to
    /// `Internal` for foreign errors.
    pub fn from_any(e: anyhow::Error) -> Error {
        match e.downcast::<Error>() {
            Ok(err) => err,
            Err(other) => Error::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
