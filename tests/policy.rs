//! Completion Policy Tests
//!
//! Deadline and roll-up decisions, independent of any store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reconciler::core::{should_complete_event, should_complete_playlist, CompletionPolicy};
use reconciler::{Playlist, Status};
use uuid::Uuid;

fn end_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 22, 0, 0).unwrap()
}

#[test]
fn test_playlist_without_end_time_never_completes() {
    let grace_periods = [Duration::hours(-5), Duration::zero(), Duration::hours(1)];
    let instants = [
        end_time() - Duration::days(365),
        end_time(),
        end_time() + Duration::days(365 * 20),
    ];

    for status in Status::CANDIDATES {
        let playlist = Playlist::new(Uuid::new_v4(), "open ended").with_status(status);
        for grace in grace_periods {
            for now in instants {
                assert!(!should_complete_playlist(&playlist, now, grace));
            }
        }
    }
}

#[test]
fn test_completed_playlist_is_never_retriggered() {
    let playlist = Playlist::new(Uuid::new_v4(), "done")
        .with_status(Status::Completed)
        .ending_at(end_time());

    assert!(!should_complete_playlist(
        &playlist,
        end_time() + Duration::days(10),
        Duration::zero()
    ));
}

#[test]
fn test_scenario_grace_period_of_one_hour() {
    let policy = CompletionPolicy::new(Duration::hours(1));
    let playlist = Playlist::new(Uuid::new_v4(), "late set")
        .with_status(Status::Running)
        .ending_at(end_time());

    // 30 minutes after the end: still within grace
    assert!(!policy.should_complete_playlist(&playlist, end_time() + Duration::minutes(30)));

    // 90 minutes after the end: overdue
    assert!(policy.should_complete_playlist(&playlist, end_time() + Duration::minutes(90)));
}

#[test]
fn test_event_roll_up() {
    assert!(should_complete_event([Status::Completed, Status::Completed]));
    assert!(!should_complete_event([Status::Completed, Status::Running]));
    assert!(!should_complete_event([]));
}

#[test]
fn test_event_roll_up_requires_completed_not_just_terminal() {
    assert!(!should_complete_event([Status::Completed, Status::Failed]));
    assert!(!should_complete_event([Status::Cancelled]));
    assert!(should_complete_event([Status::Completed]));
}
