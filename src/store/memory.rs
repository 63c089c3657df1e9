//! In-process status store.
//!
//! Cheap to clone; all clones share the same records. Used when embedding
//! the reconciler without a database and throughout the tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ensure_not_cancelled, validate_patch, StatusStore, StoreError, StoreProvider};
use crate::domain::{Event, Page, Playlist, Status};

#[derive(Debug, Default)]
struct Records {
    events: BTreeMap<Uuid, Event>,
    playlists: BTreeMap<Uuid, Playlist>,
    writes: usize,
}

/// Thread-safe in-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Records>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    /// Insert or replace an event
    pub fn insert_event(&self, event: Event) -> Result<(), StoreError> {
        self.lock()?.events.insert(event.id, event);
        Ok(())
    }

    /// Insert or replace a playlist
    pub fn insert_playlist(&self, playlist: Playlist) -> Result<(), StoreError> {
        self.lock()?.playlists.insert(playlist.id, playlist);
        Ok(())
    }

    /// Unconditionally set a playlist's status, as an external actor would
    pub fn set_playlist_status(&self, id: Uuid, status: Status) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let playlist = records
            .playlists
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        playlist.status = status;
        playlist.updated_at = Utc::now();
        Ok(())
    }

    /// Look up an event by id
    pub fn event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.lock()?.events.get(&id).cloned())
    }

    /// Look up a playlist by id
    pub fn playlist(&self, id: Uuid) -> Result<Option<Playlist>, StoreError> {
        Ok(self.lock()?.playlists.get(&id).cloned())
    }

    /// Number of successful conditional patches applied so far
    pub fn write_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.writes)
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn list_active_events(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Event>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let records = self.lock()?;
        Ok(records
            .events
            .values()
            .filter(|event| event.is_candidate())
            .cloned()
            .collect())
    }

    async fn list_playlists(
        &self,
        event_id: Uuid,
        page: Page,
        cancel: &CancellationToken,
    ) -> Result<Vec<Playlist>, StoreError> {
        ensure_not_cancelled(cancel)?;
        let records = self.lock()?;
        Ok(records
            .playlists
            .values()
            .filter(|playlist| playlist.event_id == event_id && !playlist.is_deleted)
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect())
    }

    async fn patch_playlist_status(
        &self,
        playlist_id: Uuid,
        status: Status,
    ) -> Result<Playlist, StoreError> {
        validate_patch(status)?;
        let mut records = self.lock()?;
        let playlist = records
            .playlists
            .get_mut(&playlist_id)
            .filter(|playlist| !playlist.is_deleted)
            .ok_or(StoreError::NotFound(playlist_id))?;

        if !playlist.status.is_candidate() {
            return Err(StoreError::PreconditionFailed {
                id: playlist_id,
                current: playlist.status,
            });
        }

        playlist.status = status;
        playlist.updated_at = Utc::now();
        let updated = playlist.clone();
        records.writes += 1;
        Ok(updated)
    }

    async fn patch_event_status(
        &self,
        event_id: Uuid,
        status: Status,
    ) -> Result<Event, StoreError> {
        validate_patch(status)?;
        let mut records = self.lock()?;
        let event = records
            .events
            .get_mut(&event_id)
            .filter(|event| !event.is_deleted)
            .ok_or(StoreError::NotFound(event_id))?;

        if !event.status.is_candidate() {
            return Err(StoreError::PreconditionFailed {
                id: event_id,
                current: event.status,
            });
        }

        event.status = status;
        event.updated_at = Utc::now();
        let updated = event.clone();
        records.writes += 1;
        Ok(updated)
    }
}

#[async_trait]
impl StoreProvider for MemoryStore {
    async fn acquire(&self) -> Result<Box<dyn StatusStore>, StoreError> {
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_active_events_skips_deleted_and_finished() {
        let store = MemoryStore::new();
        let active = Event::new("active").with_status(Status::Running);
        let done = Event::new("done").with_status(Status::Completed);
        let mut deleted = Event::new("deleted");
        deleted.is_deleted = true;

        store.insert_event(active.clone()).unwrap();
        store.insert_event(done).unwrap();
        store.insert_event(deleted).unwrap();

        let events = store
            .list_active_events(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, active.id);
    }

    #[tokio::test]
    async fn test_playlist_paging() {
        let store = MemoryStore::new();
        let event = Event::new("paged");
        store.insert_event(event.clone()).unwrap();
        for i in 0..5 {
            store
                .insert_playlist(Playlist::new(event.id, format!("p{}", i)))
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let first = store
            .list_playlists(event.id, Page::first(2), &cancel)
            .await
            .unwrap();
        let third = store
            .list_playlists(event.id, Page::first(2).next().next(), &cancel)
            .await
            .unwrap();
        let fourth = store
            .list_playlists(event.id, Page::first(2).next().next().next(), &cancel)
            .await
            .unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(third.len(), 1);
        assert!(fourth.is_empty());
    }

    #[tokio::test]
    async fn test_conditional_patch() {
        let store = MemoryStore::new();
        let event = Event::new("e");
        let playlist = Playlist::new(event.id, "p").with_status(Status::Running);
        store.insert_event(event).unwrap();
        store.insert_playlist(playlist.clone()).unwrap();

        let updated = store
            .patch_playlist_status(playlist.id, Status::Completed)
            .await
            .unwrap();
        assert_eq!(updated.status, Status::Completed);

        let err = store
            .patch_playlist_status(playlist.id, Status::Completed)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::PreconditionFailed {
                current: Status::Completed,
                ..
            }
        ));
        assert_eq!(store.write_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_listing() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.list_active_events(&cancel).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
