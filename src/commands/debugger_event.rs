/// Something the debugger process reported, tagged by the supervising tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent {
    Stdout(String),
    Stderr(String),
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Step,
    Breakpoint,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Step => "step",
            StopReason::Breakpoint => "breakpoint",
        }
    }
}

/// A "currently at" notification found in debugger output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub reason: StopReason,
    pub line: Option<i64>,
    pub column: Option<i64>,
    pub breakpoint: Option<i64>,
}
