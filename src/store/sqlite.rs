//! SQLite-backed status store.
//!
//! Status changes are conditional `UPDATE`s guarded by the candidate
//! statuses, so a record finished by someone else between our read and our
//! write is reported as a precondition failure instead of being overwritten.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ensure_not_cancelled, validate_patch, StatusStore, StoreError, StoreProvider};
use crate::domain::{Event, Page, Playlist, Status};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    status      TEXT NOT NULL,
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS playlists (
    id            TEXT PRIMARY KEY,
    event_id      TEXT NOT NULL REFERENCES events(id),
    name          TEXT NOT NULL,
    status        TEXT NOT NULL,
    end_time_utc  TEXT,
    is_deleted    INTEGER NOT NULL DEFAULT 0,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_status ON events(status, is_deleted);
CREATE INDEX IF NOT EXISTS idx_playlists_event ON playlists(event_id, id);
"#;

const SELECT_EVENT: &str = "SELECT id, name, status, is_deleted, updated_at FROM events";
const SELECT_PLAYLIST: &str =
    "SELECT id, event_id, name, status, end_time_utc, is_deleted, updated_at FROM playlists";

/// Store over a single SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Backend(format!("open sqlite store {}: {}", path.display(), e))
        })?;
        Self::from_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("sqlite task failed: {}", e)))?
    }

    /// Insert or replace an event
    pub async fn insert_event(&self, event: &Event) -> Result<(), StoreError> {
        let event = event.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO events (id, name, status, is_deleted, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.id.to_string(),
                    event.name,
                    event.status.as_str(),
                    event.is_deleted,
                    event.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Insert or replace a playlist
    pub async fn insert_playlist(&self, playlist: &Playlist) -> Result<(), StoreError> {
        let playlist = playlist.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO playlists
                 (id, event_id, name, status, end_time_utc, is_deleted, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    playlist.id.to_string(),
                    playlist.event_id.to_string(),
                    playlist.name,
                    playlist.status.as_str(),
                    playlist.end_time_utc,
                    playlist.is_deleted,
                    playlist.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Look up an event by id, deleted or not
    pub async fn get_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("{} WHERE id = ?1", SELECT_EVENT);
            Ok(conn
                .query_row(&sql, params![id.to_string()], event_from_row)
                .optional()?)
        })
        .await
    }

    /// Look up a playlist by id, deleted or not
    pub async fn get_playlist(&self, id: Uuid) -> Result<Option<Playlist>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!("{} WHERE id = ?1", SELECT_PLAYLIST);
            Ok(conn
                .query_row(&sql, params![id.to_string()], playlist_from_row)
                .optional()?)
        })
        .await
    }
}

#[async_trait]
impl StatusStore for SqliteStore {
    async fn list_active_events(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE is_deleted = 0 AND status IN (?1, ?2) ORDER BY id",
                SELECT_EVENT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![Status::New.as_str(), Status::Running.as_str()],
                event_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn list_playlists(
        &self,
        event_id: Uuid,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Playlist>, StoreError> {
        ensure_not_cancelled(cancel)?;
        self.with_conn(move |conn| {
            let sql = format!(
                "{} WHERE event_id = ?1 AND is_deleted = 0 ORDER BY id LIMIT ?2 OFFSET ?3",
                SELECT_PLAYLIST
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![
                    event_id.to_string(),
                    i64::from(page.size),
                    page.offset() as i64
                ],
                playlist_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn patch_playlist_status(
        &self,
        playlist_id: Uuid,
        status: Status,
    ) -> Result<Playlist, StoreError> {
        validate_patch(status)?;
        self.with_conn(move |conn| {
            let id = playlist_id.to_string();
            let changed = conn.execute(
                "UPDATE playlists SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND is_deleted = 0 AND status IN (?4, ?5)",
                params![
                    status.as_str(),
                    Utc::now(),
                    id,
                    Status::New.as_str(),
                    Status::Running.as_str()
                ],
            )?;

            let sql = format!("{} WHERE id = ?1 AND is_deleted = 0", SELECT_PLAYLIST);
            let current = conn
                .query_row(&sql, params![id], playlist_from_row)
                .optional()?;

            match current {
                None => Err(StoreError::NotFound(playlist_id)),
                Some(playlist) if changed == 0 => Err(StoreError::PreconditionFailed {
                    id: playlist_id,
                    current: playlist.status,
                }),
                Some(playlist) => Ok(playlist),
            }
        })
        .await
    }

    async fn patch_event_status(
        &self,
        event_id: Uuid,
        status: Status,
    ) -> Result<Event, StoreError> {
        validate_patch(status)?;
        self.with_conn(move |conn| {
            let id = event_id.to_string();
            let changed = conn.execute(
                "UPDATE events SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND is_deleted = 0 AND status IN (?4, ?5)",
                params![
                    status.as_str(),
                    Utc::now(),
                    id,
                    Status::New.as_str(),
                    Status::Running.as_str()
                ],
            )?;

            let sql = format!("{} WHERE id = ?1 AND is_deleted = 0", SELECT_EVENT);
            let current = conn.query_row(&sql, params![id], event_from_row).optional()?;

            match current {
                None => Err(StoreError::NotFound(event_id)),
                Some(event) if changed == 0 => Err(StoreError::PreconditionFailed {
                    id: event_id,
                    current: event.status,
                }),
                Some(event) => Ok(event),
            }
        })
        .await
    }
}

/// Opens a fresh connection for every pass
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: PathBuf,
}

impl SqliteProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StoreProvider for SqliteProvider {
    async fn acquire(&self) -> Result<Box<dyn StatusStore>, StoreError> {
        let path = self.path.clone();
        let store = tokio::task::spawn_blocking(move || SqliteStore::open(&path))
            .await
            .map_err(|e| StoreError::Backend(format!("sqlite task failed: {}", e)))??;
        Ok(Box::new(store))
    }
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn status_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Status> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: uuid_column(row, 0)?,
        name: row.get(1)?,
        status: status_column(row, 2)?,
        is_deleted: row.get(3)?,
        updated_at: row.get::<_, DateTime<Utc>>(4)?,
    })
}

fn playlist_from_row(row: &Row<'_>) -> rusqlite::Result<Playlist> {
    Ok(Playlist {
        id: uuid_column(row, 0)?,
        event_id: uuid_column(row, 1)?,
        name: row.get(2)?,
        status: status_column(row, 3)?,
        end_time_utc: row.get::<_, Option<DateTime<Utc>>>(4)?,
        is_deleted: row.get(5)?,
        updated_at: row.get::<_, DateTime<Utc>>(6)?,
    })
}
