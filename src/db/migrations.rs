use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use crate::error::Error;

/// Ordered, idempotent schema statements. Foreign keys carry the camera
/// cascade required by the data model.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'viewer',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            last_login TIMESTAMPTZ,
            active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    ),
    (
        "002_cameras",
        r#"
        CREATE TABLE IF NOT EXISTS cameras (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT,
            ingress_url TEXT NOT NULL,
            username TEXT,
            secret TEXT,
            tags JSONB NOT NULL DEFAULT '[]',
            protocols JSONB NOT NULL DEFAULT '{}',
            grid JSONB NOT NULL DEFAULT '{}',
            recording JSONB NOT NULL DEFAULT '{}',
            anpr JSONB NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'offline',
            last_seen TIMESTAMPTZ,
            observed JSONB NOT NULL DEFAULT '{}',
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "003_recordings",
        r#"
        CREATE TABLE IF NOT EXISTS recordings (
            id UUID PRIMARY KEY,
            camera_id UUID NOT NULL REFERENCES cameras(id) ON DELETE CASCADE,
            date DATE NOT NULL,
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ,
            file_path TEXT NOT NULL,
            duration_secs BIGINT NOT NULL DEFAULT 0,
            size_bytes BIGINT NOT NULL DEFAULT 0,
            format TEXT NOT NULL DEFAULT 'mp4',
            metadata JSONB
        )
        "#,
    ),
    (
        "004_anpr_events",
        r#"
        CREATE TABLE IF NOT EXISTS anpr_events (
            id UUID PRIMARY KEY,
            camera_id UUID NOT NULL REFERENCES cameras(id) ON DELETE CASCADE,
            timestamp TIMESTAMPTZ NOT NULL,
            plate TEXT NOT NULL,
            confidence DOUBLE PRECISION NOT NULL,
            snapshot_path TEXT NOT NULL,
            bbox JSONB NOT NULL,
            detector_meta JSONB
        )
        "#,
    ),
    (
        "005_indexes",
        r#"
        CREATE INDEX IF NOT EXISTS idx_recordings_camera_start
            ON recordings (camera_id, start_time DESC);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_one_active
            ON recordings (camera_id) WHERE end_time IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_path
            ON recordings (file_path);
        CREATE INDEX IF NOT EXISTS idx_anpr_events_camera_ts
            ON anpr_events (camera_id, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_anpr_events_plate
            ON anpr_events (plate)
        "#,
    ),
];

/// Apply all schema statements in order.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for (name, sql) in MIGRATIONS {
        for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| Error::Database(format!("Migration {} failed: {}", name, e)))?;
        }
        info!("Applied migration: {}", name);
    }
    Ok(())
}
