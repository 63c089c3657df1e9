//! Lifecycle status shared by events and playlists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of an event or playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Created, not yet started
    New,

    /// In progress (set by external actors only)
    Running,

    /// Temporarily halted by an operator
    Paused,

    /// Finished
    Completed,

    /// Called off before finishing
    Cancelled,

    /// Finished unsuccessfully
    Failed,
}

impl Status {
    /// All statuses, in lifecycle order
    pub const ALL: [Status; 6] = [
        Status::New,
        Status::Running,
        Status::Paused,
        Status::Completed,
        Status::Cancelled,
        Status::Failed,
    ];

    /// Statuses that make a record eligible for evaluation in a pass
    pub const CANDIDATES: [Status; 2] = [Status::New, Status::Running];

    /// New or Running
    pub fn is_candidate(self) -> bool {
        matches!(self, Self::New | Self::Running)
    }

    /// Storage representation (snake_case)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::New
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status string is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_statuses() {
        assert!(Status::New.is_candidate());
        assert!(Status::Running.is_candidate());
        assert!(!Status::Paused.is_candidate());
        assert!(!Status::Completed.is_candidate());
        assert!(!Status::Cancelled.is_candidate());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!("running".parse::<Status>().unwrap(), Status::Running);
        assert_eq!(" Completed ".parse::<Status>().unwrap(), Status::Completed);
        assert!("archived".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&Status::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");

        let parsed: Status = serde_json::from_str("\"new\"").unwrap();
        assert_eq!(parsed, Status::New);
    }
}
