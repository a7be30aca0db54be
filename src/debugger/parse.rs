//! Grammar for the text the debugger prints.
//!
//! The debugger prints free-form text, so every parser here works
//! line by line and silently drops lines that do not match its pattern.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::commands::debugger_event::{StopEvent, StopReason};

static STOP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"currently at (?P<line>\d+):(?P<col>\d+)( \[breakpoint: (?P<breakpoint>\d+)\])?")
        .expect("valid stop pattern")
});

static FRAME_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<id>\d+) (?P<name>\S+) (?P<line>\d+):(?P<col>\d+)")
        .expect("valid frame pattern")
});

static VARIABLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<name>\S+) (?P<value>-?\d+(\.\d+)?)").expect("valid variable pattern")
});

/// One line of a `stacktrace` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub id: i64,
    pub name: String,
    pub line: i64,
    pub column: i64,
}

/// One line of a `variables` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord {
    pub name: String,
    pub value: String,
}

/// Look for a stop notification anywhere in an output chunk.
pub fn parse_stop(chunk: &str) -> Option<StopEvent> {
    let caps = STOP_LINE.captures(chunk)?;
    let marker = caps.name("breakpoint");

    // Numbers too large for i64 still stop, they are just not reported.
    Some(StopEvent {
        reason: match marker {
            Some(_) => StopReason::Breakpoint,
            None => StopReason::Step,
        },
        line: caps["line"].parse().ok(),
        column: caps["col"].parse().ok(),
        breakpoint: marker.and_then(|id| id.as_str().parse().ok()),
    })
}

pub fn parse_stack_trace(reply: &str) -> Vec<FrameRecord> {
    reply
        .lines()
        .filter_map(|line| {
            let caps = FRAME_LINE.captures(line)?;
            Some(FrameRecord {
                id: caps["id"].parse().ok()?,
                name: caps["name"].to_owned(),
                line: caps["line"].parse().ok()?,
                column: caps["col"].parse().ok()?,
            })
        })
        .collect()
}

pub fn parse_variables(reply: &str) -> Vec<VariableRecord> {
    reply
        .lines()
        .filter_map(|line| {
            let caps = VARIABLE_LINE.captures(line)?;
            Some(VariableRecord {
                name: caps["name"].to_owned(),
                value: caps["value"].to_owned(),
            })
        })
        .collect()
}
