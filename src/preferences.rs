use chrono::{DateTime, TimeZone};
use log::warn;
use std::fmt;
use std::str::FromStr;

use crate::database::{DatabaseError, KeyValueStore};

pub const THEME_KEY: &str = "theme";
pub const TIME_FORMAT_KEY: &str = "timeFormat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    #[default]
    Day,
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    TwelveHour,
    #[default]
    TwentyFourHour,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Theme::Day => "day",
            Theme::Night => "night",
        })
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "day" => Ok(Theme::Day),
            "night" => Ok(Theme::Night),
            other => Err(format!("Unknown theme '{}': expected day or night", other)),
        }
    }
}

impl fmt::Display for TimeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TimeFormat::TwelveHour => "12h",
            TimeFormat::TwentyFourHour => "24h",
        })
    }
}

impl FromStr for TimeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "12h" | "12" => Ok(TimeFormat::TwelveHour),
            "24h" | "24" => Ok(TimeFormat::TwentyFourHour),
            other => Err(format!("Unknown time format '{}': expected 12h or 24h", other)),
        }
    }
}

impl TimeFormat {
    /// Wall-clock time, e.g. `09:05` or `09:05 AM`
    pub fn clock<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        match self {
            TimeFormat::TwelveHour => at.format("%I:%M %p").to_string(),
            TimeFormat::TwentyFourHour => at.format("%H:%M").to_string(),
        }
    }

    /// Date plus wall-clock time, e.g. `2025-01-15 09:05`
    pub fn timestamp<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> String
    where
        Tz::Offset: fmt::Display,
    {
        format!("{} {}", at.format("%Y-%m-%d"), self.clock(at))
    }
}

/// Display preferences that live next to the checklist data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Preferences {
    pub theme: Theme,
    pub time_format: TimeFormat,
}

impl Preferences {
    /// Read both keys; missing or unrecognised values fall back to defaults.
    pub fn load<S: KeyValueStore + ?Sized>(kv: &S) -> Result<Self, DatabaseError> {
        Ok(Self {
            theme: read_or_default(kv, THEME_KEY)?,
            time_format: read_or_default(kv, TIME_FORMAT_KEY)?,
        })
    }

    pub fn save_theme<S: KeyValueStore + ?Sized>(kv: &mut S, theme: Theme) -> Result<(), DatabaseError> {
        kv.set(THEME_KEY, &theme.to_string())
    }

    pub fn save_time_format<S: KeyValueStore + ?Sized>(
        kv: &mut S,
        time_format: TimeFormat,
    ) -> Result<(), DatabaseError> {
        kv.set(TIME_FORMAT_KEY, &time_format.to_string())
    }
}

fn read_or_default<T, S>(kv: &S, key: &str) -> Result<T, DatabaseError>
where
    T: FromStr<Err = String> + Default,
    S: KeyValueStore + ?Sized,
{
    let Some(raw) = kv.get(key)? else {
        return Ok(T::default());
    };
    Ok(raw.parse().unwrap_or_else(|e| {
        warn!("event=preference_ignored module=preferences key={} error={}", key, e);
        T::default()
    }))
}
