//! Configuration for the reconciler.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (RECONCILER_CHECK_INTERVAL,
//!    RECONCILER_COMPLETED_AFTER_HOURS, RECONCILER_DATABASE, RECONCILER_HOME)
//! 2. Config file (.reconciler/config.yaml, or an explicit path)
//! 3. Defaults (~/.reconciler) for everything except the schedule
//!
//! Config file discovery:
//! - Searches current directory and parents for .reconciler/config.yaml
//! - The database path is relative to the config file's project root
//!
//! The check interval and grace period have no defaults. A missing or
//! unparsable value stops the service from starting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const ENV_CHECK_INTERVAL: &str = "RECONCILER_CHECK_INTERVAL";
pub const ENV_COMPLETED_AFTER_HOURS: &str = "RECONCILER_COMPLETED_AFTER_HOURS";
pub const ENV_DATABASE: &str = "RECONCILER_DATABASE";
pub const ENV_HOME: &str = "RECONCILER_HOME";

const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_MAX_CONCURRENT_EVENTS: usize = 4;

/// Upper bound on the grace period magnitude (100 years)
const MAX_GRACE_HOURS: f64 = 24.0 * 365.0 * 100.0;

/// Errors that prevent the service from starting
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Failed to determine home directory")]
    NoHome,
}

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between passes
    pub check_interval_seconds: Option<f64>,
    /// Hours added to a playlist's end time before it is completed
    pub completed_after_hours: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path (relative to the project root)
    pub database: Option<String>,
    /// Playlists fetched per page
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepConfig {
    /// Events reconciled concurrently within one pass
    pub max_concurrent_events: Option<usize>,
}

/// Validated settings, read once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Time between pass starts
    pub check_interval: Duration,
    /// Grace period applied to playlist end times
    pub completed_after: chrono::Duration,
    /// SQLite database path
    pub database: PathBuf,
    /// Playlists fetched per page
    pub page_size: u32,
    /// Events reconciled concurrently within one pass
    pub max_concurrent_events: usize,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the process environment and the discovered (or
    /// given) config file
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let file = match config_path {
            Some(ref path) => Some(load_config_file(path)?),
            None => None,
        };

        let default_home = dirs::home_dir()
            .map(|home| home.join(".reconciler"))
            .ok_or(ConfigError::NoHome);

        resolve(
            file.as_ref(),
            config_path.as_deref(),
            |key| std::env::var(key).ok(),
            default_home,
        )
    }

    /// Settings for tests and embedding, with defaults for the store
    pub fn new(check_interval: Duration, completed_after: chrono::Duration) -> Self {
        Self {
            check_interval,
            completed_after,
            database: PathBuf::from("reconciler.db"),
            page_size: DEFAULT_PAGE_SIZE,
            max_concurrent_events: DEFAULT_MAX_CONCURRENT_EVENTS,
            config_file: None,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".reconciler").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_config(content: &str) -> Result<ConfigFile, serde_yaml::Error> {
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(content)
}

/// Combine file values, environment overrides and defaults, then validate
fn resolve<E>(
    file: Option<&ConfigFile>,
    config_path: Option<&Path>,
    env: E,
    default_home: Result<PathBuf, ConfigError>,
) -> Result<Settings, ConfigError>
where
    E: Fn(&str) -> Option<String>,
{
    let empty = ConfigFile::default();
    let file = file.unwrap_or(&empty);

    let interval_secs = match env(ENV_CHECK_INTERVAL) {
        Some(raw) => parse_number(ENV_CHECK_INTERVAL, &raw)?,
        None => file
            .schedule
            .check_interval_seconds
            .ok_or(ConfigError::Missing("check_interval_seconds"))?,
    };
    let check_interval = interval_from_secs(interval_secs)?;

    let grace_hours = match env(ENV_COMPLETED_AFTER_HOURS) {
        Some(raw) => parse_number(ENV_COMPLETED_AFTER_HOURS, &raw)?,
        None => file
            .schedule
            .completed_after_hours
            .ok_or(ConfigError::Missing("completed_after_hours"))?,
    };
    let completed_after = grace_from_hours(grace_hours)?;

    // Project root is the parent of .reconciler/, otherwise the config's own directory
    let base_dir = config_path
        .and_then(|p| p.parent())
        .map(|dir| match dir.file_name() {
            Some(name) if name == ".reconciler" => dir.parent().unwrap_or(dir),
            _ => dir,
        })
        .unwrap_or(Path::new("."));

    let database = if let Some(raw) = env(ENV_DATABASE) {
        PathBuf::from(raw)
    } else if let Some(ref db) = file.store.database {
        resolve_path(base_dir, db)
    } else {
        let home = match env(ENV_HOME) {
            Some(home) => PathBuf::from(home),
            None => default_home?,
        };
        home.join("reconciler.db")
    };

    let page_size = file.store.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 {
        return Err(ConfigError::Invalid {
            key: "page_size",
            value: page_size.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let max_concurrent_events = file
        .sweep
        .max_concurrent_events
        .unwrap_or(DEFAULT_MAX_CONCURRENT_EVENTS);
    if max_concurrent_events == 0 {
        return Err(ConfigError::Invalid {
            key: "max_concurrent_events",
            value: max_concurrent_events.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(Settings {
        check_interval,
        completed_after,
        database,
        page_size,
        max_concurrent_events,
        config_file: config_path.map(Path::to_path_buf),
    })
}

fn parse_number(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim().parse::<f64>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Interval must be finite and strictly positive
pub fn interval_from_secs(secs: f64) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: "check_interval_seconds",
        value: secs.to_string(),
        reason: reason.to_string(),
    };

    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid("must be a positive number of seconds"));
    }

    let interval = Duration::try_from_secs_f64(secs).map_err(|e| invalid(&e.to_string()))?;
    if interval.is_zero() {
        return Err(invalid("rounds down to zero"));
    }
    Ok(interval)
}

/// Grace period may be zero or negative, but must be finite and bounded
pub fn grace_from_hours(hours: f64) -> Result<chrono::Duration, ConfigError> {
    if !hours.is_finite() || hours.abs() > MAX_GRACE_HOURS {
        return Err(ConfigError::Invalid {
            key: "completed_after_hours",
            value: hours.to_string(),
            reason: format!("must be a finite number within ±{} hours", MAX_GRACE_HOURS),
        });
    }
    Ok(chrono::Duration::milliseconds(
        (hours * 3_600_000.0).round() as i64,
    ))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn home() -> Result<PathBuf, ConfigError> {
        Ok(PathBuf::from("/home/test/.reconciler"))
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".reconciler");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
schedule:
  check_interval_seconds: 30
  completed_after_hours: 1.5
store:
  database: data/reconciler.db
  page_size: 25
sweep:
  max_concurrent_events: 8
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version.as_deref(), Some("1.0"));
        assert_eq!(config.schedule.check_interval_seconds, Some(30.0));

        let settings = resolve(Some(&config), Some(&config_path), env_from(&[]), home()).unwrap();
        assert_eq!(settings.check_interval, Duration::from_secs(30));
        assert_eq!(settings.completed_after, chrono::Duration::minutes(90));
        assert_eq!(settings.database, temp.path().join("data/reconciler.db"));
        assert_eq!(settings.page_size, 25);
        assert_eq!(settings.max_concurrent_events, 8);
    }

    #[test]
    fn test_env_overrides_file() {
        let config = parse_config(
            "schedule:\n  check_interval_seconds: 30\n  completed_after_hours: 2\n",
        )
        .unwrap();
        let env = env_from(&[
            (ENV_CHECK_INTERVAL, "0.5"),
            (ENV_COMPLETED_AFTER_HOURS, "-1"),
            (ENV_DATABASE, "/tmp/override.db"),
        ]);

        let settings = resolve(Some(&config), None, env, home()).unwrap();
        assert_eq!(settings.check_interval, Duration::from_millis(500));
        assert_eq!(settings.completed_after, chrono::Duration::hours(-1));
        assert_eq!(settings.database, PathBuf::from("/tmp/override.db"));
    }

    #[test]
    fn test_missing_interval_is_fatal() {
        let config = parse_config("schedule:\n  completed_after_hours: 2\n").unwrap();
        let err = resolve(Some(&config), None, env_from(&[]), home()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("check_interval_seconds")));
    }

    #[test]
    fn test_missing_grace_period_is_fatal() {
        let env = env_from(&[(ENV_CHECK_INTERVAL, "60")]);
        let err = resolve(None, None, env, home()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("completed_after_hours")));
    }

    #[test]
    fn test_unparsable_values_are_fatal() {
        let env = env_from(&[
            (ENV_CHECK_INTERVAL, "sixty"),
            (ENV_COMPLETED_AFTER_HOURS, "2"),
        ]);
        let err = resolve(None, None, env, home()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_CHECK_INTERVAL, .. }));

        let env = env_from(&[
            (ENV_CHECK_INTERVAL, "60"),
            (ENV_COMPLETED_AFTER_HOURS, "soon"),
        ]);
        let err = resolve(None, None, env, home()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: ENV_COMPLETED_AFTER_HOURS,
                ..
            }
        ));
    }

    #[test]
    fn test_non_positive_interval_is_fatal() {
        assert!(interval_from_secs(0.0).is_err());
        assert!(interval_from_secs(-5.0).is_err());
        assert!(interval_from_secs(f64::NAN).is_err());
        assert!(interval_from_secs(f64::INFINITY).is_err());
        assert!(interval_from_secs(1e-12).is_err());
        assert_eq!(interval_from_secs(2.5).unwrap(), Duration::from_millis(2500));
    }

    #[test]
    fn test_grace_period_bounds() {
        assert_eq!(grace_from_hours(0.0).unwrap(), chrono::Duration::zero());
        assert!(grace_from_hours(f64::NAN).is_err());
        assert!(grace_from_hours(1e12).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_fatal() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "schedule:\n  check_interval_seconds: [oops\n").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_default_database_under_home() {
        let env = env_from(&[
            (ENV_CHECK_INTERVAL, "60"),
            (ENV_COMPLETED_AFTER_HOURS, "2"),
            (ENV_HOME, "/srv/reconciler"),
        ]);
        let settings = resolve(None, None, env, home()).unwrap();
        assert_eq!(settings.database, PathBuf::from("/srv/reconciler/reconciler.db"));
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.max_concurrent_events, DEFAULT_MAX_CONCURRENT_EVENTS);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let config = parse_config(
            "schedule:\n  check_interval_seconds: 30\n  completed_after_hours: 2\nstore:\n  page_size: 0\n",
        )
        .unwrap();
        let err = resolve(Some(&config), None, env_from(&[]), home()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "page_size", .. }));
    }
}
