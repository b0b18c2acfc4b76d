use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::app::App;
use crate::db::models::{
    AnprPolicy, Camera, GridPosition, LoginCredentials, Protocols, RecordingPolicy, UserRole,
};
use crate::db::{AnprFilter, RecordingFilter};
use crate::error::Error;

use super::{hls, websocket};

/// Build the control-surface router.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/cameras", get(list_cameras).post(create_camera))
        .route(
            "/cameras/:id",
            get(get_camera).put(update_camera).delete(delete_camera),
        )
        .route("/cameras/:id/start-record", post(start_record))
        .route("/cameras/:id/stop-record", post(stop_record))
        .route("/cameras/:id/snapshot", post(snapshot))
        .route("/cameras/:id/hls-playlist.m3u8", get(hls::playlist))
        .route("/cameras/:id/hls/:segment", get(hls::segment))
        .route("/recordings", get(list_recordings))
        .route("/anpr/events", get(list_anpr_events))
        .route("/anpr/process", post(process_anpr))
        .route("/system/stats", get(system_stats))
        .route("/ws", get(websocket::ws_handler))
        .with_state(app)
}

/// Error envelope for every handler.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_)
            | Error::AlreadyRecording(_)
            | Error::NotRecording(_)
            | Error::Unavailable(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Authentication(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

// ---- Auth ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    role: Option<String>,
}

async fn login(
    State(app): State<Arc<App>>,
    Json(credentials): Json<LoginCredentials>,
) -> Result<Json<Value>, ApiError> {
    let (user, token) = app
        .auth
        .login(&credentials)
        .await
        .map_err(Error::from_any)?;
    Ok(Json(json!({
        "token": token,
        "user": { "id": user.id, "username": user.username, "role": user.role },
    })))
}

async fn register(
    State(app): State<Arc<App>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let role = match request.role.as_deref() {
        Some("admin") => UserRole::Admin,
        Some("operator") => UserRole::Operator,
        _ => UserRole::Viewer,
    };
    let user = app
        .auth
        .register(&request.username, &request.email, &request.password, role)
        .await
        .map_err(Error::from_any)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": user.id, "username": user.username, "role": user.role })),
    ))
}

// ---- Cameras ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CameraRequest {
    name: String,
    location: Option<String>,
    ingress_url: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    protocols: Option<Protocols>,
    grid: Option<GridPosition>,
    recording: Option<RecordingPolicy>,
    anpr: Option<AnprPolicy>,
}

impl CameraRequest {
    fn into_camera(self) -> (Camera, Option<String>) {
        let mut camera = Camera::new(&self.name, &self.ingress_url);
        camera.location = self.location;
        camera.username = self.username;
        camera.tags = self.tags;
        if let Some(protocols) = self.protocols {
            camera.protocols = protocols;
        }
        if let Some(grid) = self.grid {
            camera.grid = grid;
        }
        if let Some(recording) = self.recording {
            camera.recording = recording;
        }
        if let Some(anpr) = self.anpr {
            camera.anpr = anpr;
        }
        (camera, self.password)
    }
}

fn camera_response(app: &App, camera: &Camera) -> Value {
    let mut body = serde_json::to_value(camera.sanitized()).unwrap_or(Value::Null);
    if let Some(base) = &app.config.api.media_base_url {
        body["hlsUrl"] = json!(format!(
            "{}/cameras/{}/hls-playlist.m3u8",
            base.trim_end_matches('/'),
            camera.id
        ));
    }
    body
}

async fn list_cameras(State(app): State<Arc<App>>) -> Result<Json<Value>, ApiError> {
    let cameras = app
        .store
        .list_cameras()
        .await
        .map_err(Error::from_any)?;
    let body: Vec<Value> = cameras.iter().map(|c| camera_response(&app, c)).collect();
    Ok(Json(json!(body)))
}

async fn get_camera(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let camera = app.get_camera(&id).await?;
    Ok(Json(camera_response(&app, &camera)))
}

async fn create_camera(
    State(app): State<Arc<App>>,
    Json(request): Json<CameraRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (camera, password) = request.into_camera();
    let created = app.create_camera(camera, password.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(camera_response(&app, &created))))
}

async fn update_camera(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
    Json(request): Json<CameraRequest>,
) -> Result<Json<Value>, ApiError> {
    let (camera, password) = request.into_camera();
    let updated = app.update_camera(&id, camera, password.as_deref()).await?;
    Ok(Json(camera_response(&app, &updated)))
}

async fn delete_camera(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    app.delete_camera(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Recording & snapshot commands ----------------------------------------

async fn start_record(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let recording = app.start_recording(&id).await?;
    Ok(Json(serde_json::to_value(recording).unwrap_or(Value::Null)))
}

async fn stop_record(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let recording = app.stop_recording(&id).await?;
    Ok(Json(serde_json::to_value(recording).unwrap_or(Value::Null)))
}

async fn snapshot(
    State(app): State<Arc<App>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let path = app.snapshot(&id).await?;
    Ok(Json(json!({ "path": path })))
}

// ---- Listings --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RecordingsQuery {
    #[serde(rename = "cameraId")]
    camera_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

async fn list_recordings(
    State(app): State<Arc<App>>,
    Query(query): Query<RecordingsQuery>,
) -> Result<Json<Value>, ApiError> {
    let recordings = app
        .store
        .list_recordings(&RecordingFilter {
            camera_id: query.camera_id,
            from: query.from,
            to: query.to,
        })
        .await
        .map_err(Error::from_any)?;
    Ok(Json(serde_json::to_value(recordings).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
struct AnprQuery {
    #[serde(rename = "cameraId")]
    camera_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    plate: Option<String>,
}

async fn list_anpr_events(
    State(app): State<Arc<App>>,
    Query(query): Query<AnprQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = app
        .store
        .list_anpr_events(&AnprFilter {
            camera_id: query.camera_id,
            from: query.from,
            to: query.to,
            plate: query.plate,
        })
        .await
        .map_err(Error::from_any)?;
    Ok(Json(serde_json::to_value(events).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
struct AnprProcessRequest {
    #[serde(rename = "cameraId")]
    camera_id: Uuid,
}

async fn process_anpr(
    State(app): State<Arc<App>>,
    Json(request): Json<AnprProcessRequest>,
) -> Result<StatusCode, ApiError> {
    app.trigger_anpr(&request.camera_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn system_stats(State(app): State<Arc<App>>) -> Result<Json<Value>, ApiError> {
    let stats = app.system_stats().await?;
    Ok(Json(serde_json::to_value(stats).unwrap_or(Value::Null)))
}
