//! Core reconciliation logic.
//!
//! This module contains:
//! - Policy: When a playlist is overdue and when an event is done
//! - Sweep: One reconciliation pass over all active events
//! - Scheduler: Fixed-interval loop driving the passes

pub mod policy;
pub mod scheduler;
pub mod sweep;

// Re-export commonly used types
pub use policy::{should_complete_event, should_complete_playlist, CompletionPolicy};
pub use scheduler::{Clock, Scheduler, SystemClock};
pub use sweep::{PassReport, RecordFailure, RecordKind, RecordOutcome, Reconciler};
