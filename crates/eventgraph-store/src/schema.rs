//! The minimum table set this core requires, per the external schema
//! contract. Applied with `CREATE TABLE IF NOT EXISTS` so opening an
//! existing database is idempotent.

use sqlx::SqlitePool;

use crate::error::Result;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            state_key TEXT,
            depth INTEGER NOT NULL,
            origin TEXT NOT NULL,
            origin_server_ts INTEGER NOT NULL,
            content TEXT NOT NULL,
            hashes TEXT NOT NULL,
            state_hash TEXT NOT NULL,
            signatures TEXT NOT NULL,
            age_ts INTEGER,
            unsigned TEXT,
            outlier INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_edges (
            event_id TEXT NOT NULL,
            prev_event_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            is_state INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (event_id, prev_event_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS event_edges_prev ON event_edges(prev_event_id, room_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_auth (
            event_id TEXT NOT NULL,
            auth_id TEXT NOT NULL,
            PRIMARY KEY (event_id, auth_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_forward_extremities (
            event_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            PRIMARY KEY (event_id, room_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_backward_extremities (
            event_id TEXT NOT NULL,
            room_id TEXT NOT NULL,
            PRIMARY KEY (event_id, room_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS room_depth (
            room_id TEXT PRIMARY KEY,
            min_depth INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_reference_hashes (
            event_id TEXT NOT NULL,
            algorithm TEXT NOT NULL,
            hash BLOB NOT NULL,
            PRIMARY KEY (event_id, algorithm)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
