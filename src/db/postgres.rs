use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::db::models::{
    AnprEvent, AnprPolicy, BoundingBox, Camera, CameraStatus, GridPosition, Protocols, Recording,
    RecordingPolicy, StreamMeta, User, UserRole,
};
use crate::db::{migrations, AnprFilter, MetadataStore, RecordingFilter, SystemStats};
use crate::error::Error;

/// PostgreSQL-backed metadata store
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    /// Connect and optionally run migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL metadata store");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        let store = Self {
            pool: Arc::new(pool),
        };

        if config.auto_migrate {
            migrations::run_migrations(&store.pool).await?;
        }

        Ok(store)
    }
}

/// Database row for Camera; nested policies stored as JSONB
#[derive(sqlx::FromRow)]
struct CameraRow {
    id: Uuid,
    name: String,
    location: Option<String>,
    ingress_url: String,
    username: Option<String>,
    secret: Option<String>,
    tags: serde_json::Value,
    protocols: serde_json::Value,
    grid: serde_json::Value,
    recording: serde_json::Value,
    anpr: serde_json::Value,
    status: String,
    last_seen: Option<DateTime<Utc>>,
    observed: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_from_str(s: &str) -> CameraStatus {
    match s {
        "online" => CameraStatus::Online,
        "reconnecting" => CameraStatus::Reconnecting,
        "error" => CameraStatus::Error,
        _ => CameraStatus::Offline,
    }
}

impl TryFrom<CameraRow> for Camera {
    type Error = anyhow::Error;

    fn try_from(row: CameraRow) -> Result<Self> {
        Ok(Camera {
            id: row.id,
            name: row.name,
            location: row.location,
            ingress_url: row.ingress_url,
            username: row.username,
            secret: row.secret,
            tags: serde_json::from_value(row.tags)?,
            protocols: serde_json::from_value::<Protocols>(row.protocols)?,
            grid: serde_json::from_value::<GridPosition>(row.grid)?,
            recording: serde_json::from_value::<RecordingPolicy>(row.recording)?,
            anpr: serde_json::from_value::<AnprPolicy>(row.anpr)?,
            status: status_from_str(&row.status),
            last_seen: row.last_seen,
            observed: serde_json::from_value::<StreamMeta>(row.observed)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row for Recording
#[derive(sqlx::FromRow)]
struct RecordingRow {
    id: Uuid,
    camera_id: Uuid,
    date: NaiveDate,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    file_path: String,
    duration_secs: i64,
    size_bytes: i64,
    format: String,
    metadata: Option<serde_json::Value>,
}

impl From<RecordingRow> for Recording {
    fn from(row: RecordingRow) -> Self {
        Recording {
            id: row.id,
            camera_id: row.camera_id,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            file_path: PathBuf::from(row.file_path),
            duration_secs: row.duration_secs.max(0) as u64,
            size_bytes: row.size_bytes.max(0) as u64,
            format: row.format,
            metadata: row.metadata,
        }
    }
}

/// Database row for AnprEvent
#[derive(sqlx::FromRow)]
struct AnprEventRow {
    id: Uuid,
    camera_id: Uuid,
    timestamp: DateTime<Utc>,
    plate: String,
    confidence: f64,
    snapshot_path: String,
    bbox: serde_json::Value,
    detector_meta: Option<serde_json::Value>,
}

impl TryFrom<AnprEventRow> for AnprEvent {
    type Error = anyhow::Error;

    fn try_from(row: AnprEventRow) -> Result<Self> {
        Ok(AnprEvent {
            id: row.id,
            camera_id: row.camera_id,
            timestamp: row.timestamp,
            plate: row.plate,
            confidence: row.confidence,
            snapshot_path: PathBuf::from(row.snapshot_path),
            bbox: serde_json::from_value::<BoundingBox>(row.bbox)?,
            detector_meta: row.detector_meta,
        })
    }
}

/// Database row for User
#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
    active: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let role = match row.role.as_str() {
            "admin" => UserRole::Admin,
            "operator" => UserRole::Operator,
            _ => UserRole::Viewer,
        };
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login,
            active: row.active,
        }
    }
}

fn role_to_str(role: UserRole) -> &'static str {
    match role {
        UserRole::Admin => "admin",
        UserRole::Operator => "operator",
        UserRole::Viewer => "viewer",
    }
}

const CAMERA_COLUMNS: &str = "id, name, location, ingress_url, username, secret, tags, protocols, \
     grid, recording, anpr, status, last_seen, observed, created_at, updated_at";

const RECORDING_COLUMNS: &str =
    "id, camera_id, date, start_time, end_time, file_path, duration_secs, size_bytes, format, metadata";

const ANPR_COLUMNS: &str =
    "id, camera_id, timestamp, plate, confidence, snapshot_path, bbox, detector_meta";

#[async_trait]
impl MetadataStore for PgStore {
    async fn create_user(&self, user: &User) -> Result<User> {
        info!("Creating user: {}", user.username);
        let result = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, username, email, password_hash, role, created_at, updated_at, last_login, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, username, email, password_hash, role, created_at, updated_at, last_login, active
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role_to_str(user.role))
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login)
        .bind(user.active)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint().is_some() => {
                anyhow::Error::from(Error::Conflict(format!("user already exists: {}", db.message())))
            }
            other => anyhow::Error::from(Error::Database(format!("Failed to create user: {}", other))),
        })?;

        Ok(User::from(result))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, created_at, updated_at, last_login, active
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by username: {}", e)))?;

        Ok(result.map(User::from))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let result = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, password_hash, role, created_at, updated_at, last_login, active
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get user by email: {}", e)))?;

        Ok(result.map(User::from))
    }

    async fn update_user_last_login(&self, id: &Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $1, updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to update last login: {}", e)))?;
        Ok(())
    }

    async fn delete_user(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete user: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_camera(&self, camera: &Camera) -> Result<Camera> {
        let result = sqlx::query_as::<_, CameraRow>(&format!(
            r#"
            INSERT INTO cameras ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                location = EXCLUDED.location,
                ingress_url = EXCLUDED.ingress_url,
                username = EXCLUDED.username,
                secret = EXCLUDED.secret,
                tags = EXCLUDED.tags,
                protocols = EXCLUDED.protocols,
                grid = EXCLUDED.grid,
                recording = EXCLUDED.recording,
                anpr = EXCLUDED.anpr,
                status = EXCLUDED.status,
                last_seen = EXCLUDED.last_seen,
                observed = EXCLUDED.observed,
                updated_at = EXCLUDED.updated_at
            RETURNING {columns}
            "#,
            columns = CAMERA_COLUMNS
        ))
        .bind(camera.id)
        .bind(&camera.name)
        .bind(&camera.location)
        .bind(&camera.ingress_url)
        .bind(&camera.username)
        .bind(&camera.secret)
        .bind(serde_json::to_value(&camera.tags)?)
        .bind(serde_json::to_value(camera.protocols)?)
        .bind(serde_json::to_value(camera.grid)?)
        .bind(serde_json::to_value(camera.recording)?)
        .bind(serde_json::to_value(camera.anpr)?)
        .bind(camera.status.to_string())
        .bind(camera.last_seen)
        .bind(serde_json::to_value(&camera.observed)?)
        .bind(camera.created_at)
        .bind(Utc::now())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert camera: {}", e)))?;

        Camera::try_from(result)
    }

    async fn get_camera(&self, id: &Uuid) -> Result<Option<Camera>> {
        let result = sqlx::query_as::<_, CameraRow>(&format!(
            "SELECT {} FROM cameras WHERE id = $1",
            CAMERA_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get camera: {}", e)))?;

        result.map(Camera::try_from).transpose()
    }

    async fn list_cameras(&self) -> Result<Vec<Camera>> {
        let rows = sqlx::query_as::<_, CameraRow>(&format!(
            "SELECT {} FROM cameras ORDER BY name ASC",
            CAMERA_COLUMNS
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list cameras: {}", e)))?;

        rows.into_iter().map(Camera::try_from).collect()
    }

    async fn delete_camera(&self, id: &Uuid) -> Result<bool> {
        // Recordings and ANPR events cascade via foreign keys
        let result = sqlx::query("DELETE FROM cameras WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete camera: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_camera_status(
        &self,
        id: &Uuid,
        status: CameraStatus,
        last_seen: Option<DateTime<Utc>>,
        observed: Option<StreamMeta>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE cameras
            SET status = $1,
                last_seen = COALESCE($2, last_seen),
                observed = COALESCE($3, observed),
                updated_at = $4
            WHERE id = $5
            "#,
        )
        .bind(status.to_string())
        .bind(last_seen)
        .bind(observed.map(|m| serde_json::to_value(&m)).transpose()?)
        .bind(Utc::now())
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to update camera status: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("camera {}", id)).into());
        }
        Ok(())
    }

    async fn put_recording(&self, recording: &Recording) -> Result<Recording> {
        let result = sqlx::query_as::<_, RecordingRow>(&format!(
            r#"
            INSERT INTO recordings ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                end_time = EXCLUDED.end_time,
                duration_secs = EXCLUDED.duration_secs,
                size_bytes = EXCLUDED.size_bytes,
                metadata = EXCLUDED.metadata
            RETURNING {columns}
            "#,
            columns = RECORDING_COLUMNS
        ))
        .bind(recording.id)
        .bind(recording.camera_id)
        .bind(recording.date)
        .bind(recording.start_time)
        .bind(recording.end_time)
        .bind(recording.file_path.to_string_lossy().to_string())
        .bind(recording.duration_secs as i64)
        .bind(recording.size_bytes as i64)
        .bind(&recording.format)
        .bind(&recording.metadata)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to upsert recording: {}", e)))?;

        Ok(Recording::from(result))
    }

    async fn get_recording(&self, id: &Uuid) -> Result<Option<Recording>> {
        let result = sqlx::query_as::<_, RecordingRow>(&format!(
            "SELECT {} FROM recordings WHERE id = $1",
            RECORDING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get recording: {}", e)))?;

        Ok(result.map(Recording::from))
    }

    async fn list_recordings(&self, filter: &RecordingFilter) -> Result<Vec<Recording>> {
        let rows = sqlx::query_as::<_, RecordingRow>(&format!(
            r#"
            SELECT {}
            FROM recordings
            WHERE ($1::uuid IS NULL OR camera_id = $1)
              AND ($2::timestamptz IS NULL OR start_time >= $2)
              AND ($3::timestamptz IS NULL OR start_time <= $3)
            ORDER BY start_time DESC
            "#,
            RECORDING_COLUMNS
        ))
        .bind(filter.camera_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list recordings: {}", e)))?;

        Ok(rows.into_iter().map(Recording::from).collect())
    }

    async fn delete_recording(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete recording: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_recording(&self, camera_id: &Uuid) -> Result<Option<Recording>> {
        let result = sqlx::query_as::<_, RecordingRow>(&format!(
            "SELECT {} FROM recordings WHERE camera_id = $1 AND end_time IS NULL",
            RECORDING_COLUMNS
        ))
        .bind(camera_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get active recording: {}", e)))?;

        Ok(result.map(Recording::from))
    }

    async fn expired_recordings(
        &self,
        camera_id: &Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Recording>> {
        let rows = sqlx::query_as::<_, RecordingRow>(&format!(
            r#"
            SELECT {}
            FROM recordings
            WHERE camera_id = $1 AND end_time IS NOT NULL AND start_time < $2
            ORDER BY start_time ASC
            "#,
            RECORDING_COLUMNS
        ))
        .bind(camera_id)
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list expired recordings: {}", e)))?;

        Ok(rows.into_iter().map(Recording::from).collect())
    }

    async fn put_anpr_event(&self, event: &AnprEvent) -> Result<AnprEvent> {
        let result = sqlx::query_as::<_, AnprEventRow>(&format!(
            r#"
            INSERT INTO anpr_events ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {columns}
            "#,
            columns = ANPR_COLUMNS
        ))
        .bind(event.id)
        .bind(event.camera_id)
        .bind(event.timestamp)
        .bind(&event.plate)
        .bind(event.confidence)
        .bind(event.snapshot_path.to_string_lossy().to_string())
        .bind(serde_json::to_value(event.bbox)?)
        .bind(&event.detector_meta)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to create ANPR event: {}", e)))?;

        AnprEvent::try_from(result)
    }

    async fn get_anpr_event(&self, id: &Uuid) -> Result<Option<AnprEvent>> {
        let result = sqlx::query_as::<_, AnprEventRow>(&format!(
            "SELECT {} FROM anpr_events WHERE id = $1",
            ANPR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to get ANPR event: {}", e)))?;

        result.map(AnprEvent::try_from).transpose()
    }

    async fn delete_anpr_event(&self, id: &Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM anpr_events WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete ANPR event: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_anpr_events(&self, filter: &AnprFilter) -> Result<Vec<AnprEvent>> {
        let plate = filter.plate.as_ref().map(|p| format!("%{}%", p));
        let rows = sqlx::query_as::<_, AnprEventRow>(&format!(
            r#"
            SELECT {}
            FROM anpr_events
            WHERE ($1::uuid IS NULL OR camera_id = $1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
              AND ($3::timestamptz IS NULL OR timestamp <= $3)
              AND ($4::text IS NULL OR plate ILIKE $4)
            ORDER BY timestamp DESC
            "#,
            ANPR_COLUMNS
        ))
        .bind(filter.camera_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(plate)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list ANPR events: {}", e)))?;

        rows.into_iter().map(AnprEvent::try_from).collect()
    }

    async fn count_anpr_events(
        &self,
        camera_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM anpr_events
            WHERE ($1::uuid IS NULL OR camera_id = $1)
              AND ($2::timestamptz IS NULL OR timestamp >= $2)
            "#,
        )
        .bind(camera_id)
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count ANPR events: {}", e)))?;

        Ok(count.max(0) as u64)
    }

    async fn system_stats(&self) -> Result<SystemStats> {
        let midnight = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| dt.and_local_timezone(Local).single())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let (total_cameras, online_cameras): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'online') FROM cameras",
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to count cameras: {}", e)))?;

        let active_recordings: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM recordings WHERE end_time IS NULL")
                .fetch_one(&*self.pool)
                .await
                .map_err(|e| Error::Database(format!("Failed to count recordings: {}", e)))?;

        let anpr_events_today = self.count_anpr_events(None, Some(midnight)).await?;

        Ok(SystemStats {
            total_cameras: total_cameras.max(0) as u64,
            online_cameras: online_cameras.max(0) as u64,
            active_recordings: active_recordings.max(0) as u64,
            anpr_events_today,
            storage_used_bytes: None,
            storage_total_bytes: None,
        })
    }
}
