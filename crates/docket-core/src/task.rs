use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::datetime::local_timestamp_serde;

/// Interval assumed for a task that has a start time but no end time.
pub const DEFAULT_TASK_LENGTH_MINUTES: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid task id: {s}"))?;
        Ok(Self(raw))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Task,
    Reminder,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Reminder => "reminder",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::Reminder => "Reminder",
        }
    }

    pub fn notification_title(self) -> &'static str {
        match self {
            Self::Task => "Task Due!",
            Self::Reminder => "Todo Reminder!",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "reminder" => Ok(Self::Reminder),
            other => Err(anyhow!("unknown task type: {other} (expected task or reminder)")),
        }
    }
}

/// A persisted to-do or reminder.
///
/// Field names follow the stored layout (`startTime`, `addedDate`, ...), so a
/// collection written by one session reloads field-for-field in the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    pub text: String,

    #[serde(rename = "type", default)]
    pub kind: TaskKind,

    #[serde(default, with = "local_timestamp_serde::option")]
    pub start_time: Option<NaiveDateTime>,

    #[serde(default, with = "local_timestamp_serde::option")]
    pub end_time: Option<NaiveDateTime>,

    #[serde(default)]
    pub completed: bool,

    pub added_date: NaiveDate,
}

impl Task {
    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_time.map(|start| start.date())
    }

    /// Day this task is filed under on the calendar.
    pub fn calendar_date(&self) -> NaiveDate {
        self.start_date().unwrap_or(self.added_date)
    }

    /// `[start, end)` with the default length applied when no end is set.
    pub fn effective_interval(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.start_time?;
        let end = self
            .end_time
            .unwrap_or_else(|| start + Duration::minutes(DEFAULT_TASK_LENGTH_MINUTES));
        Some((start, end))
    }
}

/// User-supplied fields for an add or an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub text: String,
    pub kind: TaskKind,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

impl TaskDraft {
    pub fn new(text: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            text: text.into(),
            kind,
            start_time: None,
            end_time: None,
        }
    }

    pub fn starting(mut self, start: NaiveDateTime) -> Self {
        self.start_time = Some(start);
        self
    }

    pub fn ending(mut self, end: NaiveDateTime) -> Self {
        self.end_time = Some(end);
        self
    }
}

impl From<&Task> for TaskDraft {
    fn from(task: &Task) -> Self {
        Self {
            text: task.text.clone(),
            kind: task.kind,
            start_time: task.start_time,
            end_time: task.end_time,
        }
    }
}
