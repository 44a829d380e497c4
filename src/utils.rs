use chrono::{NaiveTime, Timelike};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;
use thiserror::Error;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

/// Longest accepted reset interval, one hundred years.
pub const MAX_INTERVAL_MS: u64 = 100 * 366 * MS_PER_DAY;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    fn app_name(self) -> &'static str {
        match self {
            Profile::Dev => "checkloop-dev",
            Profile::Prod => "checkloop",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid interval '{0}': use a positive number with a unit, e.g. 30m, 2h, 1d")]
    Interval(String),
    #[error("Invalid time of day '{0}': use HH:MM (24-hour)")]
    TimeOfDay(String),
}

/// Get the configuration directory path.
/// If profile is Dev, uses "checkloop-dev" instead of "checkloop"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "checkloop", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path.
/// If profile is Dev, uses "checkloop-dev" instead of "checkloop"
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "checkloop", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse an interval such as `30m`, `2h`, `2hr`, `1d`, `90s` or `1500ms` into milliseconds.
/// A bare number is read as hours.
pub fn parse_interval(input: &str) -> Result<u64, ParseError> {
    let trimmed = input.trim().to_lowercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| ParseError::Interval(input.to_string()))?;
    let unit_ms = match unit.trim() {
        "ms" => 1,
        "s" | "sec" => MS_PER_SECOND,
        "m" | "min" => MS_PER_MINUTE,
        "" | "h" | "hr" => MS_PER_HOUR,
        "d" | "day" | "days" => MS_PER_DAY,
        _ => return Err(ParseError::Interval(input.to_string())),
    };

    match amount.checked_mul(unit_ms) {
        Some(ms) if ms > 0 && ms <= MAX_INTERVAL_MS => Ok(ms),
        _ => Err(ParseError::Interval(input.to_string())),
    }
}

/// Parse `HH:MM` into an (hour, minute) pair
pub fn parse_time_of_day(input: &str) -> Result<(u32, u32), ParseError> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map(|t| (t.hour(), t.minute()))
        .map_err(|_| ParseError::TimeOfDay(input.to_string()))
}

/// Format a millisecond interval as a compact label: `[2d]`, `[3hr]`, `[15m]`, `[1500ms]`
pub fn format_interval(ms: u64) -> String {
    if ms == 0 {
        return String::new();
    }
    if ms % MS_PER_DAY == 0 {
        format!("[{}d]", ms / MS_PER_DAY)
    } else if ms % MS_PER_HOUR == 0 {
        format!("[{}hr]", ms / MS_PER_HOUR)
    } else if ms % MS_PER_MINUTE == 0 {
        format!("[{}m]", ms / MS_PER_MINUTE)
    } else {
        format!("[{}ms]", ms)
    }
}
