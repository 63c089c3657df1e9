//! Events: the parent records whose status is derived from their playlists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::Status;

/// A schedulable event owning zero or more playlists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Current lifecycle status
    pub status: Status,

    /// Soft-delete flag (deleted events are never candidates)
    #[serde(default)]
    pub is_deleted: bool,

    /// Last time the status changed
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Create a new, non-deleted event in `New` status
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: Status::New,
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    /// Builder-style status override
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Eligible for evaluation in a pass
    pub fn is_candidate(&self) -> bool {
        !self.is_deleted && self.status.is_candidate()
    }
}
