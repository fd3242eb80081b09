use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "docket",
    version,
    about = "Docket: a personal task and reminder planner",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Read settings from this rc file instead of ~/.docketrc.
    #[arg(long = "rc", global = true)]
    pub rc: Option<PathBuf>,

    #[arg(
        long = "rc-override",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task or reminder.
    Add(TaskArgs),
    /// Change a task; fields left out keep their current values.
    Edit(EditArgs),
    /// Delete a task and cancel its notification.
    Delete { id: String },
    /// Toggle a task between done and pending.
    Done { id: String },
    /// Show one task in detail.
    Info { id: String },
    /// List tasks, optionally filtered.
    List {
        /// all, today, upcoming, task or reminder.
        #[arg(short = 'f', long = "filter", default_value = "all")]
        filter: String,
    },
    /// Month calendar with per-day badges.
    Calendar {
        /// Month to show as YYYY-MM; defaults to the current month.
        #[arg(short = 'm', long = "month")]
        month: Option<String>,
        #[arg(long = "prev", action = ArgAction::Count)]
        prev: u8,
        #[arg(long = "next", action = ArgAction::Count)]
        next: u8,
        #[arg(long = "prev-year", action = ArgAction::Count)]
        prev_year: u8,
        #[arg(long = "next-year", action = ArgAction::Count)]
        next_year: u8,
        /// List the full text of every task under its day.
        #[arg(short = 'd', long = "details")]
        details: bool,
    },
    /// Timeline of one day.
    Day {
        /// Day expression such as today, friday or 2024-01-05.
        date: Option<String>,
    },
    /// Completion progress for today's tasks.
    Progress,
    /// Stay in the foreground until every armed notification has fired.
    Watch,
}

#[derive(Args, Debug, Clone)]
pub struct TaskArgs {
    /// Task text.
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,

    /// task or reminder.
    #[arg(short = 't', long = "type", default_value = "task")]
    pub kind: String,

    /// Start time expression such as 9:30am, tomorrow 14:00 or +2h.
    #[arg(short = 's', long = "start")]
    pub start: Option<String>,

    /// End time expression; requires --start.
    #[arg(short = 'e', long = "end")]
    pub end: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,

    /// New task text.
    pub text: Vec<String>,

    #[arg(short = 't', long = "type")]
    pub kind: Option<String>,

    #[arg(short = 's', long = "start")]
    pub start: Option<String>,

    #[arg(short = 'e', long = "end")]
    pub end: Option<String>,

    /// Drop both start and end times.
    #[arg(long = "unschedule", conflicts_with_all = ["start", "end"])]
    pub unschedule: bool,

    /// Drop the end time only.
    #[arg(long = "no-end", conflicts_with = "end")]
    pub no_end: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_removed() {
        let pre = preprocess_args(&args(&["docket", "rc.color=off", "list", "rc.notifications:no"]));
        assert_eq!(pre.cleaned_args, args(&["docket", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.notifications".to_string(), "no".to_string()),
            ]
        );
    }

    #[test]
    fn parses_add_with_window_and_type() {
        let cli = GlobalCli::parse_from([
            "docket", "-vv", "add", "Pay", "rent", "--type", "reminder", "--start", "9:00", "--end",
            "9:30",
        ]);
        assert_eq!(cli.verbose, 2);
        let Some(Command::Add(task)) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(task.text.join(" "), "Pay rent");
        assert_eq!(task.kind, "reminder");
        assert_eq!(task.start.as_deref(), Some("9:00"));
        assert_eq!(task.end.as_deref(), Some("9:30"));
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let cli = GlobalCli::parse_from(["docket", "list", "--rc-override", "color=off", "-f", "today"]);
        assert_eq!(cli.rc_overrides.len(), 1);
        assert_eq!(cli.rc_overrides[0].key, "color");
        assert!(matches!(cli.command, Some(Command::List { ref filter }) if filter == "today"));
    }

    #[test]
    fn key_val_requires_equals() {
        assert!("color".parse::<KeyVal>().is_err());
        let kv: KeyVal = " color = off ".parse().expect("parse");
        assert_eq!((kv.key.as_str(), kv.value.as_str()), ("color", "off"));
    }
}
