use std::fmt;

/// A line of text understood by the debugger process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerCommand {
    ClearBreakpoints,
    Break { line: i64 },
    Step,
    StepIn,
    StepOut,
    Run,
    Exit,
    StackTrace,
    Variables { frame: i64 },
    Evaluate { frame: i64, expression: String },
}

impl DebuggerCommand {
    /// True when the next chunk of debugger output is the answer to this command.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            DebuggerCommand::StackTrace
                | DebuggerCommand::Variables { .. }
                | DebuggerCommand::Evaluate { .. }
        )
    }
}

impl fmt::Display for DebuggerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebuggerCommand::ClearBreakpoints => write!(f, "rbreak"),
            DebuggerCommand::Break { line } => write!(f, "break {}", line),
            DebuggerCommand::Step => write!(f, "step"),
            DebuggerCommand::StepIn => write!(f, "step in"),
            DebuggerCommand::StepOut => write!(f, "step out"),
            DebuggerCommand::Run => write!(f, "run"),
            DebuggerCommand::Exit => write!(f, "exit"),
            DebuggerCommand::StackTrace => write!(f, "stacktrace"),
            DebuggerCommand::Variables { frame } => write!(f, "variables {}", frame),
            DebuggerCommand::Evaluate { frame, expression } => {
                write!(f, "evaluate {} {}", frame, expression)
            }
        }
    }
}
