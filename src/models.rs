use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{MAX_INTERVAL_MS, format_interval};

/// Rule deciding when a completed task goes back to pending.
///
/// Serialized as `{"type":"interval","durationMs":N}` or
/// `{"type":"timeOfDay","hour":H,"minute":M}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResetPolicy {
    /// Reset `duration_ms` after completion.
    Interval {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    /// Reset at the next local wall-clock `hour:minute` after completion.
    TimeOfDay { hour: u32, minute: u32 },
}

impl ResetPolicy {
    pub fn interval_ms(duration_ms: u64) -> Self {
        Self::Interval { duration_ms }
    }

    pub fn time_of_day(hour: u32, minute: u32) -> Self {
        Self::TimeOfDay { hour, minute }
    }

    /// Check the value ranges a policy must respect before a task can use it.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            Self::Interval { duration_ms } if duration_ms == 0 => {
                Err("interval must be a positive number of milliseconds".to_string())
            }
            Self::Interval { duration_ms } if duration_ms > MAX_INTERVAL_MS => Err(format!(
                "interval of {}ms exceeds the {}ms maximum",
                duration_ms, MAX_INTERVAL_MS
            )),
            Self::TimeOfDay { hour, .. } if hour > 23 => {
                Err(format!("hour {} is out of range 0-23", hour))
            }
            Self::TimeOfDay { minute, .. } if minute > 59 => {
                Err(format!("minute {} is out of range 0-59", minute))
            }
            _ => Ok(()),
        }
    }

    pub fn is_interval(&self) -> bool {
        matches!(self, Self::Interval { .. })
    }
}

impl fmt::Display for ResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { duration_ms } => write!(f, "{}", format_interval(*duration_ms)),
            Self::TimeOfDay { hour, minute } => write!(f, "@{:02}:{:02}", hour, minute),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub reset_policy: ResetPolicy,
    #[serde(default)]
    pub one_time: bool,
}

impl Task {
    pub fn new(id: String, text: String, reset_policy: ResetPolicy, one_time: bool) -> Self {
        Self {
            id,
            text,
            completed: false,
            completed_at: None,
            reset_policy,
            one_time,
        }
    }

    /// Short policy label shown next to the task, e.g. `[2d]`, `@09:00`, `One-time @09:00`.
    pub fn badge(&self) -> String {
        match (self.one_time, self.reset_policy) {
            (true, ResetPolicy::TimeOfDay { .. }) => format!("One-time {}", self.reset_policy),
            (true, ResetPolicy::Interval { .. }) => "One-time".to_string(),
            (false, policy) => policy.to_string(),
        }
    }

    /// One-time time-of-day tasks are removed instead of reset.
    pub fn is_removed_on_reset(&self) -> bool {
        self.one_time && !self.reset_policy.is_interval()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Category {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            tasks: Vec::new(),
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Find a task by id, falling back to a case-insensitive text match.
    pub fn find_task(&self, id_or_text: &str) -> Option<&Task> {
        self.task(id_or_text)
            .or_else(|| self.tasks.iter().find(|t| eq_ignore_case(&t.text, id_or_text)))
    }

    pub fn has_task_text(&self, text: &str) -> bool {
        self.tasks.iter().any(|t| eq_ignore_case(&t.text, text))
    }
}

/// One entry of the append-only completion history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub task: String,
    pub completed_at: DateTime<Utc>,
    pub category: String,
}

pub(crate) fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
