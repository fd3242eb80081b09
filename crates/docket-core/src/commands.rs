use anyhow::{Context, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, instrument, warn};

use crate::cli::{Command, EditArgs, TaskArgs};
use crate::clock::SystemClock;
use crate::datetime::{parse_date_expr, parse_day_expr, parse_end_expr};
use crate::error::TaskError;
use crate::planner::Planner;
use crate::projection::{FilterKind, MonthCursor};
use crate::render::Renderer;
use crate::scheduler::TimerState;
use crate::task::{Task, TaskDraft, TaskId, TaskKind};

#[instrument(skip(planner, clock, renderer, command))]
pub fn dispatch(
    planner: &mut Planner,
    clock: &SystemClock,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = planner.now();
    match command {
        Command::Add(args) => cmd_add(planner, &args, now),
        Command::Edit(args) => cmd_edit(planner, &args, now),
        Command::Delete { id } => cmd_delete(planner, &id),
        Command::Done { id } => cmd_done(planner, &id),
        Command::Info { id } => cmd_info(planner, renderer, &id),
        Command::List { filter } => cmd_list(planner, renderer, &filter),
        Command::Calendar {
            month,
            prev,
            next,
            prev_year,
            next_year,
            details,
        } => {
            let mut cursor = resolve_month(month.as_deref(), planner.today())?;
            for _ in 0..prev {
                cursor = cursor.prev_month();
            }
            for _ in 0..next {
                cursor = cursor.next_month();
            }
            for _ in 0..prev_year {
                cursor = cursor.prev_year();
            }
            for _ in 0..next_year {
                cursor = cursor.next_year();
            }
            renderer.print_calendar(&planner.calendar(cursor), details)
        }
        Command::Day { date } => {
            let today = planner.today();
            let day = match date.as_deref() {
                Some(expr) => parse_day_expr(expr, today)?,
                None => today,
            };
            renderer.print_timeline(day, &planner.timeline(day))
        }
        Command::Progress => renderer.print_progress(planner.progress()),
        Command::Watch => cmd_watch(planner, clock),
    }
}

#[instrument(skip(planner, args, now))]
fn cmd_add(planner: &mut Planner, args: &TaskArgs, now: NaiveDateTime) -> anyhow::Result<()> {
    info!("command add");
    let draft = draft_from_args(args, now)?;
    let task = planner.add(draft).map_err(describe_task_error)?;
    println!("Created {} {}.", task.kind.as_str(), task.id);
    report_schedule(planner, task.id);
    Ok(())
}

#[instrument(skip(planner, args, now))]
fn cmd_edit(planner: &mut Planner, args: &EditArgs, now: NaiveDateTime) -> anyhow::Result<()> {
    info!("command edit");
    let id = parse_id(&args.id)?;
    let current = planner
        .get(id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    let draft = apply_edit(current, args, now)?;
    let task = planner.update(id, draft).map_err(describe_task_error)?;
    println!("Modified {} {}.", task.kind.as_str(), task.id);
    report_schedule(planner, task.id);
    Ok(())
}

#[instrument(skip(planner))]
fn cmd_delete(planner: &mut Planner, raw_id: &str) -> anyhow::Result<()> {
    info!("command delete");
    let id = parse_id(raw_id)?;
    match planner.remove(id).map_err(describe_task_error)? {
        Some(task) => println!("Deleted {} {} '{}'.", task.kind.as_str(), task.id, task.text),
        None => println!("No task with id {id}; nothing deleted."),
    }
    Ok(())
}

#[instrument(skip(planner))]
fn cmd_done(planner: &mut Planner, raw_id: &str) -> anyhow::Result<()> {
    info!("command done");
    let id = parse_id(raw_id)?;
    let task = planner.toggle_completed(id).map_err(describe_task_error)?;
    let state = if task.completed { "done" } else { "pending" };
    println!("Marked {} {} as {state}.", task.kind.as_str(), task.id);
    Ok(())
}

#[instrument(skip(planner, renderer))]
fn cmd_info(planner: &Planner, renderer: &mut Renderer, raw_id: &str) -> anyhow::Result<()> {
    let id = parse_id(raw_id)?;
    let task = planner
        .get(id)
        .ok_or_else(|| anyhow!("no task with id {id}"))?;
    renderer.print_task_info(task)
}

#[instrument(skip(planner, renderer))]
fn cmd_list(planner: &Planner, renderer: &mut Renderer, raw_filter: &str) -> anyhow::Result<()> {
    let kind: FilterKind = raw_filter.parse()?;
    let tasks = planner.filtered(kind);
    renderer.print_task_list(&tasks)
}

#[instrument(skip(planner, clock))]
fn cmd_watch(planner: &Planner, clock: &SystemClock) -> anyhow::Result<()> {
    let scheduler = planner.scheduler();
    match scheduler.next_fire() {
        Some((id, fire_at)) => println!(
            "Watching {} pending notification(s); next is task {id} at {}.",
            scheduler.pending_count(),
            fire_at.format("%Y-%m-%d %H:%M")
        ),
        None => {
            println!("No pending notifications.");
            return Ok(());
        }
    }

    let fired = clock.run_until_idle();
    info!(fired, "watch finished");
    println!("All notifications delivered.");
    Ok(())
}

fn report_schedule(planner: &Planner, id: TaskId) {
    if let TimerState::Pending { fire_at } = planner.scheduler().state(id) {
        println!("Notification set for {}.", fire_at.format("%Y-%m-%d %H:%M"));
    }
}

fn parse_id(raw: &str) -> anyhow::Result<TaskId> {
    raw.parse::<TaskId>()
}

fn describe_task_error(err: TaskError) -> anyhow::Error {
    if let TaskError::Persist(_) = &err {
        warn!(error = %err, "mutation rolled back");
    }
    anyhow::Error::new(err)
}

/// Builds a new-task draft from command-line arguments.
pub fn draft_from_args(args: &TaskArgs, now: NaiveDateTime) -> anyhow::Result<TaskDraft> {
    let kind: TaskKind = args.kind.parse()?;
    let start = args
        .start
        .as_deref()
        .map(|expr| parse_date_expr(expr, now).with_context(|| format!("invalid --start: {expr}")))
        .transpose()?;
    let end = resolve_end(args.end.as_deref(), start, now)?;

    Ok(TaskDraft {
        text: args.text.join(" "),
        kind,
        start_time: start,
        end_time: end,
    })
}

/// Merges edit arguments over the current task fields.
pub fn apply_edit(current: &Task, args: &EditArgs, now: NaiveDateTime) -> anyhow::Result<TaskDraft> {
    let mut draft = TaskDraft::from(current);

    if !args.text.is_empty() {
        draft.text = args.text.join(" ");
    }
    if let Some(kind) = args.kind.as_deref() {
        draft.kind = kind.parse()?;
    }

    if args.unschedule {
        draft.start_time = None;
        draft.end_time = None;
        return Ok(draft);
    }

    if let Some(expr) = args.start.as_deref() {
        draft.start_time =
            Some(parse_date_expr(expr, now).with_context(|| format!("invalid --start: {expr}"))?);
    }
    if args.no_end {
        draft.end_time = None;
    } else if args.end.is_some() {
        draft.end_time = resolve_end(args.end.as_deref(), draft.start_time, now)?;
    }

    Ok(draft)
}

/// End expressions are read relative to the start, so `--start "tomorrow 9:00"
/// --end 9:30` lands on the same morning and `--end 9:00` gives an empty window.
fn resolve_end(
    expr: Option<&str>,
    start: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> anyhow::Result<Option<NaiveDateTime>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let end = match start {
        Some(start) => parse_end_expr(expr, start),
        None => parse_date_expr(expr, now),
    }
    .with_context(|| format!("invalid --end: {expr}"))?;
    Ok(Some(end))
}

fn resolve_month(raw: Option<&str>, today: NaiveDate) -> anyhow::Result<MonthCursor> {
    let Some(raw) = raw else {
        return Ok(MonthCursor::containing(today));
    };

    let first = NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .with_context(|| format!("invalid --month: {raw} (expected YYYY-MM)"))?;
    Ok(MonthCursor::containing(first))
}
