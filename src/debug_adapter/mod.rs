pub mod protocol;
pub mod transport;

use std::collections::VecDeque;
use std::time::Instant;

use async_std::io::Write;

use anyhow::{anyhow, Result};
use debugserver_types::{
    Capabilities, ContinueResponseBody, EvaluateResponseBody, Event, Request, Response,
    ScopesArguments, Thread, ThreadsResponseBody, Variable, VariablesArguments,
    VariablesResponseBody,
};
use log::{debug, error, info, trace, warn};
use serde::de::DeserializeOwned;
use serde_json::{from_value, json, Value};

use crate::commands::{
    debugger_command::DebuggerCommand,
    debugger_event::{DebuggerEvent, StopReason},
};
use crate::debugger::{
    lifecycle::LifecycleAction,
    parse::{parse_stack_trace, parse_stop, parse_variables},
    DebuggerProcess, Launch, PendingReply, ReplyKind,
};

use protocol::{
    Breakpoint, DebugAdapterMessage, ErrorMessage, ErrorResponseBody, EvaluateArguments,
    ExitedEventBody, LaunchArguments, OutputEventBody, Scope, ScopesResponseBody,
    SetBreakpointsArguments, SetBreakpointsResponseBody, StackFrame, StackTraceResponseBody,
    StoppedEventBody,
};

/// Everything the session reacts to, funneled through one channel.
#[derive(Debug)]
pub enum Input {
    Client(DebugAdapterMessage),
    ClientClosed,
    Debugger { generation: u64, event: DebuggerEvent },
}

/// One debug session: request dispatch, sequence numbering and the debugger handle.
///
/// Requests are handled one at a time. While a request waits for debugger
/// output or for the debugger to exit, later requests are parked in the
/// backlog so their commands can not be mistaken for the awaited reply.
pub struct DebugAdapter<W: Write + Unpin, L: Launch> {
    seq: i64,
    writer: W,
    launcher: L,
    generation: u64,
    debugger: Option<DebuggerProcess>,
    launch_args: Option<LaunchArguments>,
    backlog: VecDeque<Request>,
    disconnect: Option<Request>,
    closed: bool,
}

impl<W: Write + Unpin, L: Launch> DebugAdapter<W, L> {
    pub fn new(writer: W, launcher: L) -> DebugAdapter<W, L> {
        DebugAdapter {
            seq: 1,
            writer,
            launcher,
            generation: 0,
            debugger: None,
            launch_args: None,
            backlog: VecDeque::new(),
            disconnect: None,
            closed: false,
        }
    }

    /// When the next lifecycle timer is due, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debugger
            .as_ref()
            .and_then(|debugger| debugger.lifecycle().next_deadline())
    }

    /// The client is gone and no debugger process is left behind.
    pub fn is_finished(&self) -> bool {
        self.closed && self.debugger.is_none()
    }

    /// Returns true once the session is over, see `is_finished`.
    pub async fn handle_input(&mut self, input: Input) -> Result<bool> {
        match input {
            Input::Client(msg) if self.closed => {
                debug!("Ignoring client message after close: {:?}", msg)
            }
            Input::Client(DebugAdapterMessage::Request(request)) => {
                self.backlog.push_back(request);
            }
            Input::Client(msg) => warn!("Ignoring unexpected client message: {:?}", msg),
            Input::ClientClosed => self.handle_client_closed(Instant::now()),
            Input::Debugger { generation, event } => {
                self.handle_debugger_event(generation, event).await?
            }
        }

        self.drain_backlog().await?;
        Ok(self.is_finished())
    }

    /// Nobody is left to answer, so kill the debugger and wait for it to go away.
    fn handle_client_closed(&mut self, now: Instant) {
        info!("Client closed the connection");
        self.closed = true;
        self.backlog.clear();
        self.disconnect = None;

        if let Some(debugger) = self.debugger.as_mut() {
            debugger.lifecycle_mut().begin_exit(now);
            debugger.force_kill();
        }
    }

    /// Returns true once the session is over, see `is_finished`.
    pub async fn handle_timer(&mut self, now: Instant) -> Result<bool> {
        loop {
            let action = match self.debugger.as_mut() {
                Some(debugger) => debugger.lifecycle_mut().poll(now),
                None => None,
            };

            match action {
                Some(LifecycleAction::ForceKill) => {
                    warn!("Debugger ignored the exit command, killing it");
                    if let Some(debugger) = &self.debugger {
                        debugger.force_kill();
                    }
                }
                Some(LifecycleAction::GiveUp) => {
                    error!("Debugger did not exit in time");
                    if let Some(request) = self.disconnect.take() {
                        self.send_error(&request, "debugger did not exit in time")
                            .await?;
                    }
                    if self.closed {
                        self.debugger = None;
                    }
                }
                None => break,
            }
        }

        self.drain_backlog().await?;
        Ok(self.is_finished())
    }

    fn is_busy(&self) -> bool {
        self.disconnect.is_some()
            || self
                .debugger
                .as_ref()
                .map_or(false, DebuggerProcess::has_pending_reply)
    }

    async fn drain_backlog(&mut self) -> Result<()> {
        while !self.is_busy() {
            match self.backlog.pop_front() {
                Some(request) => self.handle_dap_request(request).await?,
                None => break,
            }
        }
        Ok(())
    }

    async fn handle_dap_request(&mut self, request: Request) -> Result<()> {
        debug!("< {} ({})", request.command, request.seq);
        let result = match request.command.as_ref() {
            "initialize" => self.handle_init_dap_request(&request).await,
            "launch" => self.handle_launch_dap_request(&request).await,
            "setBreakpoints" => self.handle_set_breakpoints_dap_request(&request).await,
            "configurationDone" => self.handle_configuration_done_dap_request(&request).await,
            "threads" => self.handle_threads_dap_request(&request).await,
            "stackTrace" => self.handle_stack_trace_dap_request(&request).await,
            "next" => self.handle_step_dap_request(&request, DebuggerCommand::Step).await,
            "stepIn" => self.handle_step_dap_request(&request, DebuggerCommand::StepIn).await,
            "stepOut" => self.handle_step_dap_request(&request, DebuggerCommand::StepOut).await,
            "continue" => self.handle_continue_dap_request(&request).await,
            "scopes" => self.handle_scopes_dap_request(&request).await,
            "variables" => self.handle_variables_dap_request(&request).await,
            "evaluate" => self.handle_evaluate_dap_request(&request).await,
            "disconnect" => self.handle_disconnect_dap_request(&request).await,
            _ => {
                warn!("Unimplemented command: {}", request.command);
                Err(anyhow!("not implemented"))
            }
        };

        if let Err(err) = result {
            warn!("Error when handling DAP request: {}", err);
            self.send_error(&request, &err.to_string()).await?;
        }
        Ok(())
    }

    fn debugger_mut(&mut self) -> Result<&mut DebuggerProcess> {
        match self.debugger.as_mut() {
            Some(debugger) if debugger.lifecycle().is_running() => Ok(debugger),
            Some(_) => Err(anyhow!("debugger is exiting")),
            None => Err(anyhow!("debugger not yet launched")),
        }
    }

    async fn handle_init_dap_request(&mut self, request: &Request) -> Result<()> {
        let capabilities = Capabilities {
            supports_configuration_done_request: Some(true),
            ..Default::default()
        };

        self.send_response(request, Some(json!(capabilities)))
            .await?;
        self.send_event("initialized", None).await
    }

    async fn handle_launch_dap_request(&mut self, request: &Request) -> Result<()> {
        if self.debugger.is_some() {
            return Err(anyhow!("already launched"));
        }

        let args: LaunchArguments = get_arguments(request)?;
        info!("program: {:?}", args.program);

        self.generation += 1;
        let debugger = self.launcher.launch(&args, self.generation)?;
        self.debugger = Some(debugger);
        self.launch_args = Some(args);

        self.send_response(request, None).await
    }

    async fn handle_set_breakpoints_dap_request(&mut self, request: &Request) -> Result<()> {
        let debugger = self.debugger_mut()?;
        let args: SetBreakpointsArguments = get_arguments(request)?;
        let requested = args.requested();

        debugger.send(&DebuggerCommand::ClearBreakpoints).await?;
        for breakpoint in &requested {
            debugger
                .send(&DebuggerCommand::Break {
                    line: breakpoint.line,
                })
                .await?;
        }

        let breakpoints = requested
            .into_iter()
            .map(|requested| Breakpoint {
                requested,
                verified: true,
            })
            .collect();

        self.send_response(request, Some(json!(SetBreakpointsResponseBody { breakpoints })))
            .await
    }

    async fn handle_configuration_done_dap_request(&mut self, request: &Request) -> Result<()> {
        let stop_on_entry = self
            .launch_args
            .as_ref()
            .map_or(false, |args| args.stop_on_entry);
        let command = match stop_on_entry {
            true => DebuggerCommand::Step,
            false => DebuggerCommand::Run,
        };

        self.debugger_mut()?.send(&command).await?;
        self.send_response(request, None).await
    }

    async fn handle_threads_dap_request(&mut self, request: &Request) -> Result<()> {
        let body = ThreadsResponseBody {
            threads: vec![Thread {
                id: 0,
                name: "Main".to_owned(),
            }],
        };

        self.send_response(request, Some(json!(body))).await
    }

    async fn handle_stack_trace_dap_request(&mut self, request: &Request) -> Result<()> {
        let pending = PendingReply {
            request: request.clone(),
            kind: ReplyKind::StackTrace,
        };
        self.debugger_mut()?
            .request(&DebuggerCommand::StackTrace, pending)
            .await
    }

    async fn handle_step_dap_request(
        &mut self,
        request: &Request,
        command: DebuggerCommand,
    ) -> Result<()> {
        self.debugger_mut()?.send(&command).await?;
        self.send_response(request, None).await
    }

    async fn handle_continue_dap_request(&mut self, request: &Request) -> Result<()> {
        self.debugger_mut()?.send(&DebuggerCommand::Run).await?;

        let body = ContinueResponseBody {
            all_threads_continued: Some(true),
        };
        self.send_response(request, Some(json!(body))).await
    }

    async fn handle_scopes_dap_request(&mut self, request: &Request) -> Result<()> {
        let args: ScopesArguments = get_arguments(request)?;
        debug!("args: {:?}", args);

        let body = ScopesResponseBody {
            scopes: vec![Scope::for_frame(args.frame_id)?],
        };
        self.send_response(request, Some(json!(body))).await
    }

    async fn handle_variables_dap_request(&mut self, request: &Request) -> Result<()> {
        let args: VariablesArguments = get_arguments(request)?;
        let command = DebuggerCommand::Variables {
            frame: Scope::frame_of(args.variables_reference)?,
        };

        let pending = PendingReply {
            request: request.clone(),
            kind: ReplyKind::Variables,
        };
        self.debugger_mut()?.request(&command, pending).await
    }

    async fn handle_evaluate_dap_request(&mut self, request: &Request) -> Result<()> {
        let args: EvaluateArguments = get_arguments(request)?;
        trace!("evaluate in context {:?}", args.context);
        if args.expression.contains(is_line_break) {
            return Err(anyhow!("expression must be a single line"));
        }
        let command = DebuggerCommand::Evaluate {
            frame: args.frame_id.unwrap_or(0),
            expression: args.expression,
        };

        let pending = PendingReply {
            request: request.clone(),
            kind: ReplyKind::Evaluate,
        };
        self.debugger_mut()?.request(&command, pending).await
    }

    async fn handle_disconnect_dap_request(&mut self, request: &Request) -> Result<()> {
        if self.debugger.is_none() {
            return self.send_response(request, None).await;
        }
        let debugger = self
            .debugger
            .as_mut()
            .ok_or_else(|| anyhow!("debugger not yet launched"))?;

        if !debugger.lifecycle_mut().begin_exit(Instant::now()) {
            debugger.force_kill();
            return Err(anyhow!("debugger is already exiting"));
        }
        if let Err(err) = debugger.send(&DebuggerCommand::Exit).await {
            warn!("{:#}", err);
        }

        // Answered once the debugger exits or the deadline passes.
        self.disconnect = Some(request.clone());
        Ok(())
    }

    async fn handle_debugger_event(&mut self, generation: u64, event: DebuggerEvent) -> Result<()> {
        match &self.debugger {
            Some(debugger) if debugger.generation() == generation => (),
            _ => {
                debug!("Ignoring output of a previous debugger: {:?}", event);
                return Ok(());
            }
        }

        if self.closed {
            if let DebuggerEvent::Exited { code } = event {
                info!("Debugger exited with {:?} after the client left", code);
                self.debugger = None;
            }
            return Ok(());
        }

        match event {
            DebuggerEvent::Stdout(chunk) => {
                trace!("debugger: {:?}", chunk);
                self.send_output(None, &chunk).await?;

                if let Some(stop) = parse_stop(&chunk) {
                    debug!("stopped: {:?}", stop);
                    let body = StoppedEventBody {
                        all_threads_stopped: Some(true),
                        description: match (stop.reason, stop.breakpoint) {
                            (_, Some(id)) => Some(format!("Paused on breakpoint {}", id)),
                            (StopReason::Breakpoint, None) => {
                                Some("Paused on breakpoint".to_owned())
                            }
                            (StopReason::Step, None) => None,
                        },
                        preserve_focus_hint: None,
                        reason: stop.reason.as_str().to_owned(),
                        text: None,
                        thread_id: Some(0),
                    };
                    self.send_event("stopped", Some(json!(body))).await?;
                }

                let pending = self.debugger.as_mut().and_then(DebuggerProcess::take_reply);
                if let Some(pending) = pending {
                    self.complete_reply(pending, chunk).await?;
                }
            }
            DebuggerEvent::Stderr(chunk) => {
                self.send_output(Some("stderr"), &chunk).await?;
            }
            DebuggerEvent::Exited { code } => self.handle_debugger_exit(code).await?,
        }

        Ok(())
    }

    async fn handle_debugger_exit(&mut self, code: Option<i32>) -> Result<()> {
        let mut debugger = match self.debugger.take() {
            Some(debugger) => debugger,
            None => return Ok(()),
        };
        let was_running = debugger.lifecycle().is_running();
        debugger.lifecycle_mut().on_exited();
        self.launch_args = None;

        for pending in debugger.drain_replies() {
            self.send_error(&pending.request, "debugger exited").await?;
        }

        match self.disconnect.take() {
            Some(request) => self.send_response(&request, None).await?,
            None if was_running => {
                info!("Debugger exited on its own with {:?}", code);
                let body = ExitedEventBody {
                    exit_code: code.map_or(-1, i64::from),
                };
                self.send_event("exited", Some(json!(body))).await?;
                self.send_event("terminated", None).await?;
            }
            None => (),
        }
        Ok(())
    }

    async fn complete_reply(&mut self, pending: PendingReply, chunk: String) -> Result<()> {
        let body = match pending.kind {
            ReplyKind::StackTrace => {
                let source = self
                    .launch_args
                    .as_ref()
                    .map(LaunchArguments::source)
                    .unwrap_or_default();
                let stack_frames: Vec<StackFrame> = parse_stack_trace(&chunk)
                    .into_iter()
                    .map(|frame| StackFrame {
                        id: frame.id,
                        name: frame.name,
                        line: frame.line,
                        column: frame.column,
                        source: source.clone(),
                    })
                    .collect();
                let total_frames = stack_frames.len() as i64;

                json!(StackTraceResponseBody {
                    stack_frames,
                    total_frames,
                })
            }
            ReplyKind::Variables => {
                let variables = parse_variables(&chunk)
                    .into_iter()
                    .map(|var| Variable {
                        evaluate_name: None,
                        indexed_variables: None,
                        name: var.name,
                        named_variables: None,
                        presentation_hint: None,
                        type_: None,
                        value: var.value,
                        variables_reference: 0,
                    })
                    .collect();

                json!(VariablesResponseBody { variables })
            }
            ReplyKind::Evaluate => json!(EvaluateResponseBody {
                result: chunk,
                variables_reference: 0.0,
                type_: None,
                indexed_variables: None,
                named_variables: None,
                presentation_hint: None,
            }),
        };

        self.send_response(&pending.request, Some(body)).await
    }

    fn next_seq(&mut self) -> i64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    async fn send_response(&mut self, request: &Request, body: Option<Value>) -> Result<()> {
        let response = Response {
            body,
            command: request.command.clone(),
            message: None,
            request_seq: request.seq,
            seq: self.next_seq(),
            success: true,
            type_: "response".to_owned(),
        };

        transport::send_message(&mut self.writer, &response).await
    }

    async fn send_error(&mut self, request: &Request, message: &str) -> Result<()> {
        let body = ErrorResponseBody {
            error: ErrorMessage {
                id: 0,
                format: message.to_owned(),
            },
        };
        let response = Response {
            body: Some(json!(body)),
            command: request.command.clone(),
            message: Some(message.to_owned()),
            request_seq: request.seq,
            seq: self.next_seq(),
            success: false,
            type_: "response".to_owned(),
        };

        transport::send_message(&mut self.writer, &response).await
    }

    async fn send_event(&mut self, event: &str, body: Option<Value>) -> Result<()> {
        let event = Event {
            body,
            event: event.to_owned(),
            seq: self.next_seq(),
            type_: "event".to_owned(),
        };

        transport::send_message(&mut self.writer, &event).await
    }

    async fn send_output(&mut self, category: Option<&str>, output: &str) -> Result<()> {
        let body = OutputEventBody {
            category: category.map(str::to_owned),
            output: output.to_owned(),
        };
        self.send_event("output", Some(json!(body))).await
    }
}

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}

pub fn get_arguments<T: DeserializeOwned>(req: &Request) -> Result<T> {
    let value = match req.arguments.as_ref() {
        Some(val) => val,
        None => {
            error!("Expected arguments");
            return Err(anyhow!("Expected arguments"));
        }
    };
    from_value(value.to_owned()).map_err(|e| e.into())
}
