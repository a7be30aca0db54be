use std::path::PathBuf;

use anyhow::{anyhow, Result};
use debugserver_types::{Event, Request, Response};
use serde::{Deserialize, Serialize, Serializer};

/// A decoded DAP message.
#[derive(Debug, Clone)]
pub enum DebugAdapterMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}

impl Serialize for DebugAdapterMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DebugAdapterMessage::Request(req) => req.serialize(serializer),
            DebugAdapterMessage::Response(res) => res.serialize(serializer),
            DebugAdapterMessage::Event(event) => event.serialize(serializer),
        }
    }
}

/// Arguments of the `launch` request, kept for the whole session.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: PathBuf,
    #[serde(default)]
    pub stop_on_entry: bool,
}

impl LaunchArguments {
    pub fn source(&self) -> Source {
        Source {
            name: self
                .program
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            path: Some(self.program.to_string_lossy().into_owned()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    pub line: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    #[serde(default)]
    pub source: Source,
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated by DAP, still sent by some older clients.
    pub lines: Option<Vec<i64>>,
}

impl SetBreakpointsArguments {
    pub fn requested(self) -> Vec<SourceBreakpoint> {
        match (self.breakpoints, self.lines) {
            (Some(breakpoints), _) => breakpoints,
            (None, Some(lines)) => lines
                .into_iter()
                .map(|line| SourceBreakpoint {
                    line,
                    column: None,
                    condition: None,
                    hit_condition: None,
                    log_message: None,
                })
                .collect(),
            (None, None) => vec![],
        }
    }
}

/// The requested breakpoint echoed back, always verified.
#[derive(Serialize, Debug, Clone)]
pub struct Breakpoint {
    #[serde(flatten)]
    pub requested: SourceBreakpoint,
    pub verified: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct SetBreakpointsResponseBody {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub line: i64,
    pub column: i64,
    pub source: Source,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
    pub total_frames: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
}

impl Scope {
    /// The single scope of a frame. Its reference encodes the frame id.
    pub fn for_frame(frame_id: i64) -> Result<Scope> {
        let variables_reference = frame_id
            .checked_add(1)
            .ok_or_else(|| anyhow!("invalid frame id {}", frame_id))?;

        Ok(Scope {
            name: "Stack Frame".to_owned(),
            variables_reference,
            expensive: false,
        })
    }

    pub fn frame_of(variables_reference: i64) -> Result<i64> {
        variables_reference
            .checked_sub(1)
            .ok_or_else(|| anyhow!("invalid variables reference {}", variables_reference))
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct ScopesResponseBody {
    pub scopes: Vec<Scope>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    pub frame_id: Option<i64>,
    pub context: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct OutputEventBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub output: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_focus_hint: Option<bool>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub thread_id: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i64,
}

#[derive(Serialize, Debug)]
pub struct ErrorMessage {
    pub id: i64,
    pub format: String,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponseBody {
    pub error: ErrorMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_value, json, to_value};

    #[test]
    fn launch_arguments_default_stop_on_entry() {
        let args: LaunchArguments = from_value(json!({"program": "/tmp/a.tt"})).unwrap();
        assert!(!args.stop_on_entry);
        let source = args.source();
        assert_eq!(source.name.as_deref(), Some("a.tt"));
        assert_eq!(source.path.as_deref(), Some("/tmp/a.tt"));
    }

    #[test]
    fn breakpoints_fall_back_to_lines() {
        let args: SetBreakpointsArguments =
            from_value(json!({"source": {"path": "a.tt"}, "lines": [4, 9]})).unwrap();
        let lines: Vec<_> = args.requested().iter().map(|b| b.line).collect();
        assert_eq!(lines, [4, 9]);
    }

    #[test]
    fn echoed_breakpoint_keeps_request_fields() {
        let bp = Breakpoint {
            requested: SourceBreakpoint {
                line: 3,
                column: Some(2),
                condition: None,
                hit_condition: None,
                log_message: None,
            },
            verified: true,
        };
        assert_eq!(
            to_value(&bp).unwrap(),
            json!({"line": 3, "column": 2, "verified": true})
        );
    }

    #[test]
    fn scope_reference_round_trips_frame() {
        let scope = Scope::for_frame(4).unwrap();
        assert_eq!(scope.variables_reference, 5);
        assert_eq!(Scope::frame_of(scope.variables_reference).unwrap(), 4);
    }

    #[test]
    fn out_of_range_references_are_errors() {
        assert!(Scope::for_frame(i64::MAX).is_err());
        assert!(Scope::frame_of(i64::MIN).is_err());
        assert_eq!(Scope::frame_of(i64::MAX).unwrap(), i64::MAX - 1);
    }
}
