//! Playlists: the child records, each with an optional deadline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::Status;

/// A unit of work belonging to exactly one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    /// Unique identifier
    pub id: Uuid,

    /// Owning event
    pub event_id: Uuid,

    /// Display name
    pub name: String,

    /// Current lifecycle status
    pub status: Status,

    /// Scheduled end; `None` means the playlist never completes on its own
    pub end_time_utc: Option<DateTime<Utc>>,

    /// Soft-delete flag
    #[serde(default)]
    pub is_deleted: bool,

    /// Last time the status changed
    pub updated_at: DateTime<Utc>,
}

impl Playlist {
    /// Create a new playlist in `New` status with no deadline
    pub fn new(event_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            name: name.into(),
            status: Status::New,
            end_time_utc: None,
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    /// Builder-style status override
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Builder-style deadline
    pub fn ending_at(mut self, end_time_utc: DateTime<Utc>) -> Self {
        self.end_time_utc = Some(end_time_utc);
        self
    }
}

/// One page of a paged listing (0-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    /// First page of the given size (a zero size is bumped to 1)
    pub fn first(size: u32) -> Self {
        Self {
            number: 0,
            size: size.max(1),
        }
    }

    /// The page after this one
    pub fn next(self) -> Self {
        Self {
            number: self.number.saturating_add(1),
            size: self.size,
        }
    }

    /// Number of records before this page
    pub fn offset(self) -> u64 {
        u64::from(self.number) * u64::from(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        let page = Page::first(50);
        assert_eq!(page.offset(), 0);
        assert_eq!(page.next().offset(), 50);
        assert_eq!(page.next().next().number, 2);
    }

    #[test]
    fn test_zero_page_size_is_bumped() {
        assert_eq!(Page::first(0).size, 1);
    }

    #[test]
    fn test_playlist_serialization_without_deadline() {
        let playlist = Playlist::new(Uuid::new_v4(), "Morning set");
        let json = serde_json::to_string(&playlist).unwrap();
        let parsed: Playlist = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.end_time_utc, None);
        assert_eq!(parsed.status, Status::New);
    }
}
