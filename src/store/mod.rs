//! Status store gateway.
//!
//! The only boundary through which the reconciler touches persistence.
//! A [`StoreProvider`] hands out one [`StatusStore`] handle per pass; the
//! handle is dropped when the pass ends, on every exit path.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{Event, Page, Playlist, Status};

pub use memory::MemoryStore;
pub use sqlite::{SqliteProvider, SqliteStore};

/// Errors returned by a status store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Record {id} is {current}, expected new or running")]
    PreconditionFailed { id: Uuid, current: Status },

    #[error("Invalid patch: {0}")]
    Validation(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Read and conditional-write access to event and playlist status
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Non-deleted events whose status is New or Running
    async fn list_active_events(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, StoreError>;

    /// One page of an event's non-deleted playlists, in stable order.
    /// Callers drain pages until an empty one comes back.
    async fn list_playlists(
        &self,
        event_id: Uuid,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Playlist>, StoreError>;

    /// Set a playlist's status, only if it is currently New or Running
    async fn patch_playlist_status(
        &self,
        playlist_id: Uuid,
        status: Status,
    ) -> Result<Playlist, StoreError>;

    /// Set an event's status, only if it is currently New or Running
    async fn patch_event_status(&self, event_id: Uuid, status: Status)
        -> Result<Event, StoreError>;
}

/// Hands out a scoped store handle for a single pass
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn StatusStore>, StoreError>;
}

/// Reject patch payloads that would not move a record out of the candidate set
pub fn validate_patch(status: Status) -> Result<(), StoreError> {
    if status.is_candidate() {
        return Err(StoreError::Validation(format!(
            "cannot patch status to {}",
            status
        )));
    }
    Ok(())
}

/// Fail fast when the pass has been cancelled
pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_patch() {
        assert!(validate_patch(Status::Completed).is_ok());
        assert!(validate_patch(Status::Cancelled).is_ok());
        assert!(matches!(
            validate_patch(Status::Running),
            Err(StoreError::Validation(_))
        ));
        assert!(validate_patch(Status::New).is_err());
    }

    #[test]
    fn test_precondition_message_names_status() {
        let err = StoreError::PreconditionFailed {
            id: Uuid::nil(),
            current: Status::Completed,
        };
        assert!(err.to_string().contains("completed"));
    }
}
