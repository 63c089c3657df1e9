//! Reconciliation sweep.
//!
//! One pass:
//! 1. Acquire a store handle and list the active (New/Running) events
//! 2. For each event, drain its playlists, complete the overdue ones, then
//!    complete the event if every playlist ended up Completed
//! 3. Fold every per-record outcome into a [`PassReport`]
//!
//! A failing record is logged and recorded; it never stops the pass. Only
//! failing to reach the store at all fails the pass as a whole.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::domain::{Event, Page, Playlist, Status};
use crate::store::{StatusStore, StoreError, StoreProvider};

use super::policy::{should_complete_event, CompletionPolicy};
use super::scheduler::{Clock, SystemClock};

/// Which kind of record an outcome refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Event,
    Playlist,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event => f.write_str("event"),
            Self::Playlist => f.write_str("playlist"),
        }
    }
}

/// Result of evaluating a single record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Patched to Completed by this pass
    Completed,

    /// Not eligible; nothing written
    Unchanged,

    /// Another actor moved the record first; carries the status it now has
    AlreadyHandled(Status),

    /// The write failed; the record stays a candidate for the next pass
    Failed(String),
}

impl RecordOutcome {
    /// Latest known status of the record after this outcome
    pub fn status_after(&self, observed: Status) -> Status {
        match self {
            Self::Completed => Status::Completed,
            Self::AlreadyHandled(current) => *current,
            Self::Unchanged | Self::Failed(_) => observed,
        }
    }
}

/// A record that could not be reconciled in this pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub kind: RecordKind,
    pub id: Uuid,
    pub event_id: Uuid,
    pub reason: String,
}

/// Summary of one pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    /// The `now` every deadline was compared against
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub events_scanned: usize,
    pub events_completed: usize,
    /// Events not started because the pass was cancelled
    pub events_skipped: usize,
    pub playlists_scanned: usize,
    pub playlists_completed: usize,
    /// Conditional writes rejected because the record had already moved on
    pub already_handled: usize,
    pub cancelled: bool,
    pub failures: Vec<RecordFailure>,
}

impl PassReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            events_scanned: 0,
            events_completed: 0,
            events_skipped: 0,
            playlists_scanned: 0,
            playlists_completed: 0,
            already_handled: 0,
            cancelled: false,
            failures: Vec::new(),
        }
    }

    /// Successful status writes made by this pass
    pub fn writes(&self) -> usize {
        self.events_completed + self.playlists_completed
    }

    /// No record failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, event: EventReport) {
        if event.skipped {
            self.events_skipped += 1;
            self.cancelled = true;
        }
        if event.completed {
            self.events_completed += 1;
        }
        self.playlists_scanned += event.playlists_scanned;
        self.playlists_completed += event.playlists_completed;
        self.already_handled += event.already_handled;
        self.failures.extend(event.failures);
    }
}

/// Per-event tally, folded into the pass report
#[derive(Debug, Default)]
struct EventReport {
    skipped: bool,
    completed: bool,
    playlists_scanned: usize,
    playlists_completed: usize,
    already_handled: usize,
    failures: Vec<RecordFailure>,
}

impl EventReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    fn record(&mut self, kind: RecordKind, id: Uuid, event_id: Uuid, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Completed => match kind {
                RecordKind::Event => self.completed = true,
                RecordKind::Playlist => self.playlists_completed += 1,
            },
            RecordOutcome::AlreadyHandled(_) => self.already_handled += 1,
            RecordOutcome::Unchanged => {}
            RecordOutcome::Failed(reason) => self.failures.push(RecordFailure {
                kind,
                id,
                event_id,
                reason: reason.clone(),
            }),
        }
    }
}

/// A pass cancelled before any event was looked at
fn stopped_early(mut report: PassReport) -> PassReport {
    info!("Pass cancelled before listing events");
    report.cancelled = true;
    report
}

/// Runs reconciliation passes against a status store
pub struct Reconciler {
    provider: Arc<dyn StoreProvider>,
    policy: CompletionPolicy,
    clock: Arc<dyn Clock>,
    page_size: u32,
    max_concurrent_events: usize,
}

impl Reconciler {
    /// Create a reconciler using the system clock
    pub fn new(provider: Arc<dyn StoreProvider>, settings: &Settings) -> Self {
        Self {
            provider,
            policy: CompletionPolicy::new(settings.completed_after),
            clock: Arc::new(SystemClock),
            page_size: settings.page_size.max(1),
            max_concurrent_events: settings.max_concurrent_events.max(1),
        }
    }

    /// Replace the clock used to read `now` at the start of each pass
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &CompletionPolicy {
        &self.policy
    }

    /// Run one pass at the clock's current time
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassReport> {
        self.run_pass_at(self.clock.now(), cancel).await
    }

    /// Run one pass, comparing deadlines against `now`
    pub async fn run_pass_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<PassReport> {
        let started = Instant::now();
        let mut report = PassReport::new(now);

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        info!(%now, grace_period = %self.policy.grace_period(), "Starting reconciliation pass");

        // The handle lives for this pass only and is dropped on every return path
        let store = match self.provider.acquire().await {
            Ok(store) => store,
            Err(StoreError::Cancelled) => return Ok(stopped_early(report)),
            Err(e) => return Err(e).context("Failed to acquire status store"),
        };

        let events = match store.list_active_events(cancel).await {
            Ok(events) => events,
            Err(StoreError::Cancelled) => return Ok(stopped_early(report)),
            Err(e) => return Err(e).context("Failed to list active events"),
        };
        report.events_scanned = events.len();

        let store: &dyn StatusStore = store.as_ref();
        let outcomes: Vec<EventReport> = stream::iter(events)
            .map(|event| self.reconcile_event(store, event, now, cancel))
            .buffer_unordered(self.max_concurrent_events)
            .collect()
            .await;

        for outcome in outcomes {
            report.absorb(outcome);
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            events = report.events_scanned,
            events_completed = report.events_completed,
            playlists_completed = report.playlists_completed,
            already_handled = report.already_handled,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Reconciliation pass finished"
        );

        Ok(report)
    }

    /// Reconcile one event: playlists first, then the event itself
    #[instrument(skip_all, fields(event_id = %event.id))]
    async fn reconcile_event(
        &self,
        store: &dyn StatusStore,
        event: Event,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> EventReport {
        if cancel.is_cancelled() {
            debug!("Pass cancelled, skipping event");
            return EventReport::skipped();
        }

        let mut report = EventReport::default();

        let playlists = match self.fetch_playlists(store, event.id, cancel).await {
            Ok(playlists) => playlists,
            Err(StoreError::Cancelled) => return EventReport::skipped(),
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to list playlists");
                report.record(
                    RecordKind::Event,
                    event.id,
                    event.id,
                    &RecordOutcome::Failed(e.to_string()),
                );
                return report;
            }
        };
        report.playlists_scanned = playlists.len();

        let mut statuses = Vec::with_capacity(playlists.len());
        for playlist in &playlists {
            let outcome = self.complete_playlist(store, playlist, now).await;
            statuses.push(outcome.status_after(playlist.status));
            report.record(RecordKind::Playlist, playlist.id, event.id, &outcome);
        }

        if should_complete_event(statuses) {
            let outcome = self.complete_event(store, &event).await;
            report.record(RecordKind::Event, event.id, event.id, &outcome);
        }

        report
    }

    /// Drain every page of an event's playlists, de-duplicated by id
    async fn fetch_playlists(
        &self,
        store: &dyn StatusStore,
        event_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Vec<Playlist>, StoreError> {
        let mut page = Page::first(self.page_size);
        let mut seen = HashSet::new();
        let mut playlists = Vec::new();

        loop {
            let batch = store.list_playlists(event_id, page, cancel).await?;
            if batch.is_empty() {
                break;
            }

            let before = playlists.len();
            for playlist in batch {
                if seen.insert(playlist.id) {
                    playlists.push(playlist);
                }
            }
            // A page of nothing but repeats means the store is not advancing
            if playlists.len() == before {
                break;
            }
            page = page.next();
        }

        Ok(playlists)
    }

    async fn complete_playlist(
        &self,
        store: &dyn StatusStore,
        playlist: &Playlist,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        if !self.policy.should_complete_playlist(playlist, now) {
            return RecordOutcome::Unchanged;
        }

        match store
            .patch_playlist_status(playlist.id, Status::Completed)
            .await
        {
            Ok(_) => {
                info!(playlist_id = %playlist.id, event_id = %playlist.event_id, "Playlist completed");
                RecordOutcome::Completed
            }
            Err(StoreError::PreconditionFailed { current, .. }) => {
                debug!(playlist_id = %playlist.id, %current, "Playlist already handled");
                RecordOutcome::AlreadyHandled(current)
            }
            Err(e) => {
                warn!(
                    playlist_id = %playlist.id,
                    event_id = %playlist.event_id,
                    error = %e,
                    "Failed to complete playlist"
                );
                RecordOutcome::Failed(e.to_string())
            }
        }
    }

    async fn complete_event(&self, store: &dyn StatusStore, event: &Event) -> RecordOutcome {
        match store.patch_event_status(event.id, Status::Completed).await {
            Ok(_) => {
                info!(event_id = %event.id, "Event completed");
                RecordOutcome::Completed
            }
            Err(StoreError::PreconditionFailed { current, .. }) => {
                debug!(event_id = %event.id, %current, "Event already handled");
                RecordOutcome::AlreadyHandled(current)
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to complete event");
                RecordOutcome::Failed(e.to_string())
            }
        }
    }
}
