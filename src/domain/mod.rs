//! Domain types for the reconciler.
//!
//! This module contains the core data structures:
//! - Status: Lifecycle status shared by both record kinds
//! - Event: Parent record, completed once all of its playlists are
//! - Playlist: Child record with an optional deadline

pub mod event;
pub mod playlist;
pub mod status;

// Re-export commonly used types
pub use event::Event;
pub use playlist::{Page, Playlist};
pub use status::{Status, UnknownStatus};
