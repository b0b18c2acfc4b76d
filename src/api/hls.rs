use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::App;
use crate::error::Error;

use super::rest::ApiError;

const PLAYLIST_MIME: &str = "application/vnd.apple.mpegurl";
const SEGMENT_MIME: &str = "video/mp2t";

/// Serve the rolling live playlist for a camera.
pub async fn playlist(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let camera = app.get_camera(&id).await?;
    if !camera.protocols.hls {
        return Err(Error::Validation("HLS is disabled for this camera".into()).into());
    }

    let path = app.layout.live_playlist(&id);
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| Error::NotFound(format!("live playlist for camera {}", id)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, PLAYLIST_MIME),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Serve one live segment file.
pub async fn segment(
    State(app): State<Arc<App>>,
    Path((id, segment)): Path<(Uuid, String)>,
) -> Result<Response, ApiError> {
    app.get_camera(&id).await?;

    // Segment names are flat files inside the live directory
    if segment.contains("..") || segment.contains('/') || segment.contains('\\') {
        return Err(Error::Validation("bad segment name".into()).into());
    }

    let path = app.layout.live_dir(&id).join(&segment);
    let body = tokio::fs::read(&path)
        .await
        .map_err(|_| Error::NotFound(format!("segment {}", segment)))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, SEGMENT_MIME),
            (header::CACHE_CONTROL, "public, max-age=2"),
        ],
        body,
    )
        .into_response())
}
