//! Read-only views derived from a snapshot of the task collection.
//!
//! Everything here is a pure function of `&[Task]` plus the day being looked
//! at, recomputed from scratch on each call.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use tracing::trace;
use unicode_width::UnicodeWidthChar;
use unicode_width::UnicodeWidthStr;

use crate::datetime::{MINUTES_PER_DAY, end_of_day, minutes_of_day, start_of_day};
use crate::task::{Task, TaskId, TaskKind};

pub const DEFAULT_BADGE_LIMIT: usize = 2;
pub const DEFAULT_TIMELINE_FLOOR_MINUTES: u32 = 30;

const BADGE_MAX_WIDTH: usize = 15;
const BADGE_TRUNCATED_WIDTH: usize = 12;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterKind {
    #[default]
    All,
    Today,
    Upcoming,
    ByType(TaskKind),
}

impl FilterKind {
    pub fn matches(&self, task: &Task, today: NaiveDate) -> bool {
        match self {
            Self::All => true,
            Self::Today => task.start_date() == Some(today),
            Self::Upcoming => task.start_date().is_some_and(|date| date > today),
            Self::ByType(kind) => task.kind == *kind,
        }
    }
}

impl FromStr for FilterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "upcoming" => Ok(Self::Upcoming),
            "task" | "tasks" => Ok(Self::ByType(TaskKind::Task)),
            "reminder" | "reminders" => Ok(Self::ByType(TaskKind::Reminder)),
            other => Err(anyhow!(
                "unknown filter: {other} (expected all, today, upcoming, task or reminder)"
            )),
        }
    }
}

#[tracing::instrument(skip(tasks))]
pub fn filter<'a>(tasks: &'a [Task], kind: FilterKind, today: NaiveDate) -> Vec<&'a Task> {
    let out: Vec<&Task> = tasks.iter().filter(|t| kind.matches(t, today)).collect();
    trace!(total = tasks.len(), matched = out.len(), "filtered tasks");
    out
}

/// Buckets every task under its calendar date (start date, else the day it was added).
pub fn group_by_date(tasks: &[Task]) -> BTreeMap<NaiveDate, Vec<&Task>> {
    let mut groups: BTreeMap<NaiveDate, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.calendar_date()).or_default().push(task);
    }
    groups
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Badge {
    pub task_id: TaskId,
    pub label: String,
    pub completed: bool,
}

/// What a calendar cell shows for one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBadges {
    pub badges: Vec<Badge>,
    /// Entries hidden behind the "+N more" marker.
    pub overflow: usize,
    /// Full text of every task, one per line.
    pub tooltip: String,
}

impl DayBadges {
    pub fn overflow_label(&self) -> Option<String> {
        (self.overflow > 0).then(|| format!("+{} more", self.overflow))
    }
}

pub fn day_badges(group: &[&Task], limit: usize) -> DayBadges {
    let badges = group
        .iter()
        .take(limit)
        .map(|task| Badge {
            task_id: task.id,
            label: truncate_label(&task.text),
            completed: task.completed,
        })
        .collect();

    DayBadges {
        badges,
        overflow: group.len().saturating_sub(limit),
        tooltip: group
            .iter()
            .map(|task| task.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn truncate_label(text: &str) -> String {
    if UnicodeWidthStr::width(text) <= BADGE_MAX_WIDTH {
        return text.to_string();
    }

    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width > BADGE_TRUNCATED_WIDTH {
            break;
        }
        width += ch_width;
        out.push(ch);
    }
    out.push_str("...");
    out
}

/// A displayed month; navigation never fails because the cursor always
/// holds a valid first-of-month date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthCursor {
    first: NaiveDate,
}

impl MonthCursor {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first| Self { first })
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn days_in_month(&self) -> u32 {
        let next = self.first + Months::new(1);
        next.signed_duration_since(self.first).num_days() as u32
    }

    pub fn label(&self) -> String {
        format!("{} {}", MONTH_NAMES[self.first.month0() as usize], self.year())
    }

    pub fn prev_month(self) -> Self {
        self.shift_back(1)
    }

    pub fn next_month(self) -> Self {
        self.shift_forward(1)
    }

    pub fn prev_year(self) -> Self {
        self.shift_back(12)
    }

    pub fn next_year(self) -> Self {
        self.shift_forward(12)
    }

    fn shift_back(self, months: u32) -> Self {
        self.first
            .checked_sub_months(Months::new(months))
            .map(|first| Self { first })
            .unwrap_or(self)
    }

    fn shift_forward(self, months: u32) -> Self {
        self.first
            .checked_add_months(Months::new(months))
            .map(|first| Self { first })
            .unwrap_or(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub is_today: bool,
    pub badges: Option<DayBadges>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
    pub label: String,
    /// Empty cells before the 1st in a Sunday-first week.
    pub leading_blanks: u32,
    pub days: Vec<CalendarDay>,
}

#[tracing::instrument(skip(tasks))]
pub fn month_grid(
    cursor: MonthCursor,
    tasks: &[Task],
    today: NaiveDate,
    badge_limit: usize,
) -> MonthGrid {
    let groups = group_by_date(tasks);
    let days = cursor
        .first_day()
        .iter_days()
        .take(cursor.days_in_month() as usize)
        .map(|date| CalendarDay {
            date,
            is_today: date == today,
            badges: groups.get(&date).map(|group| day_badges(group, badge_limit)),
        })
        .collect();

    MonthGrid {
        label: cursor.label(),
        leading_blanks: cursor.first_day().weekday().num_days_from_sunday(),
        days,
    }
}

/// One task's slice of a single day, positioned as a share of 24 hours.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSegment {
    pub task_id: TaskId,
    pub text: String,
    pub kind: TaskKind,
    pub completed: bool,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub start_minute: u32,
    pub end_minute: u32,
    pub top_percent: f64,
    pub height_percent: f64,
}

/// Lays out the tasks touching `day`.
///
/// Segments are clipped to the day and ordered by clipped start. Overlapping
/// segments are left overlapping. The visual floor never extends a segment
/// past midnight.
#[tracing::instrument(skip(tasks))]
pub fn daily_timeline(tasks: &[Task], day: NaiveDate, floor_minutes: u32) -> Vec<TimelineSegment> {
    let day_start = start_of_day(day);
    let day_end = end_of_day(day);

    let mut segments: Vec<TimelineSegment> = tasks
        .iter()
        .filter_map(|task| {
            let (start, end) = task.effective_interval()?;
            if start > day_end || end < day_start {
                return None;
            }

            let clipped_start = start.max(day_start);
            let clipped_end = end.min(day_end);
            if clipped_end <= clipped_start {
                trace!(id = %task.id, "dropping zero-length timeline segment");
                return None;
            }

            let start_minute = minutes_of_day(clipped_start);
            let end_minute = minutes_of_day(clipped_end);
            let shown = end_minute
                .saturating_sub(start_minute)
                .max(floor_minutes)
                .min(MINUTES_PER_DAY - start_minute);

            Some(TimelineSegment {
                task_id: task.id,
                text: task.text.clone(),
                kind: task.kind,
                completed: task.completed,
                start: clipped_start,
                end: clipped_end,
                start_minute,
                end_minute,
                top_percent: share_of_day(start_minute),
                height_percent: share_of_day(shown),
            })
        })
        .collect();

    segments.sort_by_key(|segment| segment.start);
    segments
}

fn share_of_day(minutes: u32) -> f64 {
    f64::from(minutes) / f64::from(MINUTES_PER_DAY) * 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    NoTasks,
    Counts { completed: usize, total: usize },
}

impl Progress {
    pub fn percent(&self) -> u8 {
        match *self {
            Self::NoTasks => 0,
            Self::Counts { completed, total } => {
                ((completed as f64 / total as f64) * 100.0).round() as u8
            }
        }
    }

    pub fn label(&self) -> String {
        match *self {
            Self::NoTasks => "No tasks for today".to_string(),
            Self::Counts { completed, total } => format!("{completed}/{total} completed"),
        }
    }
}

pub fn progress_for_today(tasks: &[Task], today: NaiveDate) -> Progress {
    let todays = filter(tasks, FilterKind::Today, today);
    if todays.is_empty() {
        return Progress::NoTasks;
    }

    Progress::Counts {
        completed: todays.iter().filter(|t| t.completed).count(),
        total: todays.len(),
    }
}
