//! Completion policy.
//!
//! Pure decisions, no I/O:
//! - A playlist is overdue once `now >= end_time_utc + grace period`
//! - An event completes once every one of its playlists is Completed

use chrono::{DateTime, Duration, Utc};

use crate::domain::{Playlist, Status};

/// Grace period applied to every playlist deadline in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    grace_period: Duration,
}

impl CompletionPolicy {
    /// Create a policy with the given grace period (may be zero or negative)
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// The moment a playlist becomes eligible, if it has a deadline at all
    pub fn deadline(&self, playlist: &Playlist) -> Option<DateTime<Utc>> {
        playlist
            .end_time_utc
            .and_then(|end| end.checked_add_signed(self.grace_period))
    }

    /// See [`should_complete_playlist`]
    pub fn should_complete_playlist(&self, playlist: &Playlist, now: DateTime<Utc>) -> bool {
        should_complete_playlist(playlist, now, self.grace_period)
    }
}

/// True iff the playlist is New/Running, has an end time, and
/// `now >= end_time_utc + grace_period`.
///
/// A deadline that overflows the representable range never comes due.
pub fn should_complete_playlist(
    playlist: &Playlist,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> bool {
    if !playlist.status.is_candidate() {
        return false;
    }

    playlist
        .end_time_utc
        .and_then(|end| end.checked_add_signed(grace_period))
        .map(|deadline| now >= deadline)
        .unwrap_or(false)
}

/// True iff there is at least one status and all of them are Completed.
///
/// An event with no playlists is never completed by this rule.
pub fn should_complete_event<I>(statuses: I) -> bool
where
    I: IntoIterator<Item = Status>,
{
    let mut any = false;
    for status in statuses {
        if status != Status::Completed {
            return false;
        }
        any = true;
    }
    any
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn playlist(status: Status, end: Option<DateTime<Utc>>) -> Playlist {
        let mut playlist = Playlist::new(Uuid::new_v4(), "test").with_status(status);
        playlist.end_time_utc = end;
        playlist
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_no_end_time_never_completes() {
        let p = playlist(Status::Running, None);
        for hours in [-48, 0, 1, 10_000] {
            assert!(!should_complete_playlist(
                &p,
                t0() + Duration::hours(hours),
                Duration::hours(1)
            ));
            assert!(!should_complete_playlist(
                &p,
                t0(),
                Duration::hours(hours)
            ));
        }
    }

    #[test]
    fn test_grace_period_boundary() {
        let p = playlist(Status::New, Some(t0()));
        let grace = Duration::hours(1);

        assert!(!should_complete_playlist(&p, t0() + Duration::minutes(30), grace));
        assert!(!should_complete_playlist(&p, t0() + Duration::minutes(59), grace));
        assert!(should_complete_playlist(&p, t0() + Duration::hours(1), grace));
        assert!(should_complete_playlist(&p, t0() + Duration::minutes(90), grace));
    }

    #[test]
    fn test_zero_and_negative_grace() {
        let p = playlist(Status::Running, Some(t0()));

        assert!(should_complete_playlist(&p, t0(), Duration::zero()));
        assert!(!should_complete_playlist(&p, t0() - Duration::seconds(1), Duration::zero()));
        assert!(should_complete_playlist(
            &p,
            t0() - Duration::minutes(30),
            Duration::hours(-1)
        ));
    }

    #[test]
    fn test_only_candidates_complete() {
        let long_ago = Some(t0() - Duration::days(30));
        for status in [Status::Completed, Status::Paused, Status::Cancelled, Status::Failed] {
            let p = playlist(status, long_ago);
            assert!(!should_complete_playlist(&p, t0(), Duration::zero()));
        }
    }

    #[test]
    fn test_overflowing_deadline_never_due() {
        let p = playlist(Status::Running, Some(DateTime::<Utc>::MAX_UTC));
        assert!(!should_complete_playlist(&p, DateTime::<Utc>::MAX_UTC, Duration::hours(1)));
    }

    #[test]
    fn test_event_completion() {
        assert!(should_complete_event([Status::Completed, Status::Completed]));
        assert!(!should_complete_event([Status::Completed, Status::Running]));
        assert!(!should_complete_event([Status::Completed, Status::Cancelled]));
        assert!(!should_complete_event(Vec::<Status>::new()));
    }

    #[test]
    fn test_policy_deadline() {
        let policy = CompletionPolicy::new(Duration::hours(2));
        let p = playlist(Status::New, Some(t0()));

        assert_eq!(policy.deadline(&p), Some(t0() + Duration::hours(2)));
        assert_eq!(policy.deadline(&playlist(Status::New, None)), None);
        assert!(policy.should_complete_playlist(&p, t0() + Duration::hours(2)));
    }
}
