//! reconciler - Poll-based completion of events and their playlists
//!
//! On a fixed interval, the reconciler scans every active (New or Running)
//! event, completes each playlist whose end time plus a grace period has
//! passed, and completes the event once all of its playlists are Completed.
//!
//! # Architecture
//!
//! - All writes are conditional on the record still being New or Running,
//!   so a record finished by someone else is never overwritten
//! - A failing record is logged and skipped; the next pass retries it
//! - Nothing is cached between passes
//!
//! # Modules
//!
//! - `domain`: Data structures (Event, Playlist, Status)
//! - `core`: Completion policy, reconciliation sweep, scheduler
//! - `store`: Status store gateway (in-memory and SQLite)
//! - `service`: Start/stop lifecycle for the hosting process
//! - `config`: Settings loading and validation
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run continuously
//! RECONCILER_CHECK_INTERVAL=60 RECONCILER_COMPLETED_AFTER_HOURS=2 reconciler run
//!
//! # Run one pass and print the report
//! reconciler sweep --json
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod service;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::{ConfigError, Settings};
pub use core::{CompletionPolicy, PassReport, Reconciler, Scheduler};
pub use domain::{Event, Page, Playlist, Status};
pub use service::{Service, ServiceHandle, StopOutcome};
pub use store::{MemoryStore, SqliteProvider, SqliteStore, StatusStore, StoreError, StoreProvider};
