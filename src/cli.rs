//! Command line and shell grammar.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "novacal", version, about = "Calendar assistant for Google Calendar")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(flatten)]
    Action(Action),
    /// Interactive session with conversational memory
    Shell,
}

/// Calendar operations, available both as subcommands and inside the shell.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Action {
    /// Show events across the agenda calendars
    Agenda {
        /// First day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD), defaults to the first day
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Search events by keyword and show their IDs
    Find { keyword: String },
    /// Add a new event to the calendar
    Create {
        #[command(flatten)]
        event: NewEvent,
    },
    /// Change an event by ID
    Update {
        id: String,
        #[command(flatten)]
        changes: Changes,
    },
    /// Change the single event matching a keyword
    UpdateMatching {
        keyword: String,
        #[command(flatten)]
        changes: Changes,
    },
    /// Delete an event by ID
    Delete { id: String },
    /// Delete the single event matching a keyword
    DeleteMatching { keyword: String },
    /// Print all events as a FullCalendar JSON feed
    Export,
}

/// Fields of a new event. Without `--end`, a timed event lasts one hour and
/// an all-day event covers the start day.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct NewEvent {
    #[arg(long)]
    pub title: String,
    #[arg(long)]
    pub start: String,
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
}

/// Fields to change. Times accept `YYYY-MM-DD`, `YYYY-MM-DD HH:MM` (in the
/// configured timezone) or RFC 3339. A date-only `--end` is the last day the
/// event covers, so `--start 2024-08-17 --end 2024-08-17` is one full day.
/// Start and end must both be dates or both be times.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct Changes {
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub location: Option<String>,
}

/// One line typed into the shell.
#[derive(Parser, Debug)]
#[command(name = "novacal", no_binary_name = true, disable_version_flag = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum ShellCommand {
    #[command(flatten)]
    Action(Action),
    /// Clear the transcript; the assistant keeps its memory
    Clear,
    /// Forget everything: transcript, memory and calendar connection
    Reset,
    /// Switch to another Google access token (implies reset)
    SetToken { token: String },
    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

/// Parse a shell line; `Ok(None)` for a blank line.
pub fn parse_shell_line(line: &str) -> Result<Option<ShellCommand>, String> {
    let words = split_words(line)?;
    if words.is_empty() {
        return Ok(None);
    }
    ShellLine::try_parse_from(words)
        .map(|parsed| Some(parsed.command))
        .map_err(|e| e.to_string())
}

/// Split on whitespace, keeping single- or double-quoted runs together.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(format!("Unclosed quote {}", q));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
