use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::projection::{MonthGrid, Progress, TimelineSegment};
use crate::task::{Task, TaskKind};

const TIMELINE_TRACK_WIDTH: usize = 48;
const CALENDAR_CELL_WIDTH: usize = 5;
const WEEKDAY_HEADERS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_list(&mut self, tasks: &[&Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_task_list(&mut out, tasks)
    }

    pub fn write_task_list<W: Write>(&self, out: &mut W, tasks: &[&Task]) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks found for this filter.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Type".to_string(),
            "Task".to_string(),
            "Schedule".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                let done = if task.completed { "[x]" } else { "[ ]" };
                let text = if task.completed {
                    self.paint(&task.text, "9")
                } else {
                    task.text.clone()
                };
                let kind = match task.kind {
                    TaskKind::Reminder => self.paint(task.kind.label(), "36"),
                    TaskKind::Task => task.kind.label().to_string(),
                };
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    done.to_string(),
                    kind,
                    text,
                    describe_schedule(task),
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "text      {}", task.text)?;
        writeln!(out, "type      {}", task.kind.label())?;
        writeln!(out, "completed {}", if task.completed { "yes" } else { "no" })?;
        writeln!(out, "added     {}", task.added_date)?;
        if let Some(start) = task.start_time {
            writeln!(out, "start     {}", start.format("%Y-%m-%d %H:%M"))?;
        }
        if let Some(end) = task.end_time {
            writeln!(out, "end       {}", end.format("%Y-%m-%d %H:%M"))?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, grid), fields(month = %grid.label))]
    pub fn print_calendar(&mut self, grid: &MonthGrid, details: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_calendar(&mut out, grid, details)
    }

    /// With `details`, every task text of a busy day is listed under its badges.
    pub fn write_calendar<W: Write>(
        &self,
        out: &mut W,
        grid: &MonthGrid,
        details: bool,
    ) -> anyhow::Result<()> {
        let total_width = CALENDAR_CELL_WIDTH * WEEKDAY_HEADERS.len();
        writeln!(out, "{:^total_width$}", grid.label)?;
        for header in WEEKDAY_HEADERS {
            write!(out, "{header:<CALENDAR_CELL_WIDTH$}")?;
        }
        writeln!(out)?;

        let mut column = 0;
        for _ in 0..grid.leading_blanks {
            write!(out, "{:CALENDAR_CELL_WIDTH$}", "")?;
            column += 1;
        }

        for day in &grid.days {
            let marker = if day.badges.is_some() { "*" } else { " " };
            let cell = format!("{:>2}{marker}", day.date.format("%-d"));
            let cell = if day.is_today {
                self.paint(&cell, "7")
            } else {
                cell
            };
            write!(out, "{cell}  ")?;

            column += 1;
            if column % WEEKDAY_HEADERS.len() == 0 {
                writeln!(out)?;
            }
        }
        if column % WEEKDAY_HEADERS.len() != 0 {
            writeln!(out)?;
        }

        let busy: Vec<_> = grid
            .days
            .iter()
            .filter_map(|day| day.badges.as_ref().map(|badges| (day.date, badges)))
            .collect();
        if busy.is_empty() {
            return Ok(());
        }

        writeln!(out)?;
        for (date, badges) in busy {
            let mut labels: Vec<String> = badges
                .badges
                .iter()
                .map(|badge| {
                    if badge.completed {
                        self.paint(&badge.label, "9")
                    } else {
                        badge.label.clone()
                    }
                })
                .collect();
            if let Some(more) = badges.overflow_label() {
                labels.push(self.paint(&more, "2"));
            }
            writeln!(out, "{}  {}", date.format("%b %d"), labels.join(", "))?;
            if details {
                for line in badges.tooltip.lines() {
                    writeln!(out, "        - {line}")?;
                }
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, segments))]
    pub fn print_timeline(&mut self, day: NaiveDate, segments: &[TimelineSegment]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_timeline(&mut out, day, segments)
    }

    pub fn write_timeline<W: Write>(
        &self,
        out: &mut W,
        day: NaiveDate,
        segments: &[TimelineSegment],
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", day.format("%A, %B %-d, %Y"))?;
        if segments.is_empty() {
            writeln!(out, "Nothing scheduled.")?;
            return Ok(());
        }

        let ruler: String = (0..TIMELINE_TRACK_WIDTH)
            .map(|col| if col % (TIMELINE_TRACK_WIDTH / 4) == 0 { '|' } else { '.' })
            .collect();
        writeln!(out, "{:11} {ruler}", "")?;
        writeln!(out, "{:11} {:<12}{:<12}{:<12}{:<12}", "", "0:00", "6:00", "12:00", "18:00")?;

        for segment in segments {
            let (offset, len) = track_span(segment.top_percent, segment.height_percent);
            let bar = format!(
                "{}{}{}",
                " ".repeat(offset),
                "#".repeat(len),
                " ".repeat(TIMELINE_TRACK_WIDTH.saturating_sub(offset + len))
            );
            let bar = match segment.kind {
                TaskKind::Reminder => self.paint(&bar, "36"),
                TaskKind::Task => self.paint(&bar, "34"),
            };
            writeln!(
                out,
                "{}-{} {} {}",
                segment.start.format("%H:%M"),
                segment.end.format("%H:%M"),
                bar,
                segment.text
            )?;
        }

        Ok(())
    }

    pub fn print_progress(&mut self, progress: Progress) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let filled = usize::from(progress.percent()) * 20 / 100;
        writeln!(
            out,
            "[{}{}] {}",
            "=".repeat(filled),
            " ".repeat(20 - filled),
            progress.label()
        )?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Column offset and length of a segment on the text track; never empty.
fn track_span(top_percent: f64, height_percent: f64) -> (usize, usize) {
    let width = TIMELINE_TRACK_WIDTH as f64;
    let offset = ((top_percent / 100.0) * width).floor() as usize;
    let offset = offset.min(TIMELINE_TRACK_WIDTH - 1);
    let len = ((height_percent / 100.0) * width).round().max(1.0) as usize;
    (offset, len.min(TIMELINE_TRACK_WIDTH - offset))
}

/// Human summary of a task's time window.
pub fn describe_schedule(task: &Task) -> String {
    let Some(start) = task.start_time else {
        return String::new();
    };

    match task.end_time {
        None => format!("Starts: {}", start.format("%Y-%m-%d %H:%M")),
        Some(end) if end.date() == start.date() => format!(
            "Starts: {} - {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%H:%M")
        ),
        Some(end) => format!(
            "Starts: {} - Ends: {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        ),
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::projection::{MonthCursor, daily_timeline, month_grid};
    use crate::task::TaskId;

    fn sample(id: u64, text: &str, start: (u32, u32), end: Option<(u32, u32)>) -> Task {
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");
        Task {
            id: TaskId(id),
            text: text.to_string(),
            kind: TaskKind::Task,
            start_time: day.and_hms_opt(start.0, start.1, 0),
            end_time: end.and_then(|(h, m)| day.and_hms_opt(h, m, 0)),
            completed: false,
            added_date: day,
        }
    }

    #[test]
    fn describes_same_day_and_open_windows() {
        assert_eq!(
            describe_schedule(&sample(1, "Pay rent", (9, 0), Some((9, 30)))),
            "Starts: 2024-01-05 09:00 - 09:30"
        );
        assert_eq!(
            describe_schedule(&sample(2, "Call", (14, 0), None)),
            "Starts: 2024-01-05 14:00"
        );
    }

    #[test]
    fn table_aligns_columns_and_reports_empty_lists() {
        let renderer = Renderer::plain();
        let mut out = Vec::new();
        renderer.write_task_list(&mut out, &[]).expect("render");
        assert_eq!(String::from_utf8(out).expect("utf8"), "No tasks found for this filter.\n");

        let task = sample(7, "Pay rent", (9, 0), None);
        let mut out = Vec::new();
        renderer.write_task_list(&mut out, &[&task]).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID Done Type"));
        assert!(lines[2].contains("Pay rent"));
    }

    #[test]
    fn calendar_lists_badges_under_the_grid() {
        let tasks = vec![sample(1, "Pay rent", (9, 0), None)];
        let cursor = MonthCursor::new(2024, 1).expect("valid month");
        let today = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");
        let grid = month_grid(cursor, &tasks, today, 2);

        let mut out = Vec::new();
        Renderer::plain().write_calendar(&mut out, &grid, false).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("January 2024"));
        assert!(text.contains(" 5*"));
        assert!(text.contains("Jan 05  Pay rent"));
        assert!(!text.contains("- Pay rent"));
    }

    #[test]
    fn calendar_details_list_every_task_text() {
        let tasks = vec![
            sample(1, "Pay rent", (9, 0), None),
            sample(2, "Renew the car insurance policy", (10, 0), None),
            sample(3, "Call bank", (11, 0), None),
        ];
        let cursor = MonthCursor::new(2024, 1).expect("valid month");
        let today = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");
        let grid = month_grid(cursor, &tasks, today, 2);

        let mut out = Vec::new();
        Renderer::plain().write_calendar(&mut out, &grid, true).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("+1 more"));
        assert!(text.contains("        - Renew the car insurance policy\n"));
        assert!(text.contains("        - Call bank\n"));
    }

    #[test]
    fn timeline_bars_stay_on_the_track() {
        let tasks = vec![sample(1, "Late", (23, 50), Some((23, 55)))];
        let day = NaiveDate::from_ymd_opt(2024, 1, 5).expect("valid date");
        let segments = daily_timeline(&tasks, day, 30);

        let mut out = Vec::new();
        Renderer::plain().write_timeline(&mut out, day, &segments).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        let bar_line = text.lines().last().expect("segment line");
        assert!(bar_line.starts_with("23:50-23:55"));
        assert!(bar_line.ends_with("# Late"));
    }
}
