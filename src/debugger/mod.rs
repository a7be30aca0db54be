pub mod lifecycle;
pub mod parse;

use std::collections::VecDeque;

use async_std::channel::{self, Receiver, Sender};
use async_std::io::{Read, ReadExt, Write, WriteExt};
use async_std::process::{Child, Command, Stdio};
use async_std::task;

use anyhow::{anyhow, Context, Result};
use debugserver_types::Request;
use futures::{pin_mut, select, FutureExt};
use log::{debug, info, warn};

use crate::commands::{debugger_command::DebuggerCommand, debugger_event::DebuggerEvent};
use crate::config::Config;
use crate::debug_adapter::{protocol::LaunchArguments, Input};

use lifecycle::Lifecycle;

const READ_CHUNK: usize = 4096;

/// Which structured reply a waiting request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    StackTrace,
    Variables,
    Evaluate,
}

/// A client request waiting for the next chunk of debugger output.
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub request: Request,
    pub kind: ReplyKind,
}

/// Starts debugger processes for the session.
pub trait Launch {
    fn launch(&mut self, args: &LaunchArguments, generation: u64) -> Result<DebuggerProcess>;
}

/// The session's handle to a running debugger.
///
/// Owns the write side of the debugger's stdin and the queue of requests
/// waiting for a reply. Replies are handed out in FIFO order, one per output
/// chunk.
pub struct DebuggerProcess {
    generation: u64,
    stdin: Box<dyn Write + Send + Unpin>,
    kill: Sender<()>,
    replies: VecDeque<PendingReply>,
    lifecycle: Lifecycle,
}

impl DebuggerProcess {
    pub fn new(
        generation: u64,
        stdin: Box<dyn Write + Send + Unpin>,
        kill: Sender<()>,
        mut lifecycle: Lifecycle,
    ) -> DebuggerProcess {
        lifecycle.start();
        DebuggerProcess {
            generation,
            stdin,
            kill,
            replies: VecDeque::new(),
            lifecycle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    /// Write a command without waiting for any output.
    pub async fn send(&mut self, command: &DebuggerCommand) -> Result<()> {
        debug!("> {}", command);
        let mut line = command.to_string();
        if line.contains(|c: char| c == '\n' || c == '\r') {
            return Err(anyhow!("'{}' spans more than one line", line.escape_debug()));
        }
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to send '{}' to the debugger", command))?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Write a command whose reply is the next output chunk.
    pub async fn request(&mut self, command: &DebuggerCommand, pending: PendingReply) -> Result<()> {
        if !command.expects_reply() {
            return Err(anyhow!("'{}' does not produce a reply", command));
        }
        self.send(command).await?;
        self.replies.push_back(pending);
        Ok(())
    }

    pub fn take_reply(&mut self) -> Option<PendingReply> {
        self.replies.pop_front()
    }

    pub fn has_pending_reply(&self) -> bool {
        !self.replies.is_empty()
    }

    pub fn drain_replies(&mut self) -> Vec<PendingReply> {
        self.replies.drain(..).collect()
    }

    /// Ask the supervisor to terminate the process.
    pub fn force_kill(&self) -> bool {
        self.kill.try_send(()).is_ok()
    }
}

/// Spawns the configured debugger as `<debugger> <program> -d`.
pub struct ProcessLauncher {
    config: Config,
    inbox: Sender<Input>,
}

impl ProcessLauncher {
    pub fn new(config: Config, inbox: Sender<Input>) -> ProcessLauncher {
        ProcessLauncher { config, inbox }
    }
}

impl Launch for ProcessLauncher {
    fn launch(&mut self, args: &LaunchArguments, generation: u64) -> Result<DebuggerProcess> {
        if self.config.is_missing_config() {
            return Err(anyhow!(self.config.missing_config_message()));
        }
        let debugger = self
            .config
            .debugger_path
            .as_ref()
            .ok_or_else(|| anyhow!("Missing debugger path"))?;

        let mut command = Command::new(debugger);
        command
            .arg(&args.program)
            .arg("-d")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.config.work_directory_for(&args.program) {
            command.current_dir(dir);
        }

        info!("Starting {:?} {:?} -d", debugger, args.program);
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start debugger {:?}", debugger))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Debugger stdin is not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Debugger stdout is not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Debugger stderr is not piped"))?;

        let (kill_tx, kill_rx) = channel::bounded(1);

        task::spawn(forward_output(
            stdout,
            generation,
            DebuggerEvent::Stdout,
            self.inbox.clone(),
        ));
        task::spawn(forward_output(
            stderr,
            generation,
            DebuggerEvent::Stderr,
            self.inbox.clone(),
        ));
        task::spawn(supervise(child, kill_rx, generation, self.inbox.clone()));

        Ok(DebuggerProcess::new(
            generation,
            Box::new(stdin),
            kill_tx,
            self.config.lifecycle(),
        ))
    }
}

/// Post every chunk read from one of the debugger's output pipes to the inbox.
async fn forward_output<R: Read + Unpin>(
    mut reader: R,
    generation: u64,
    wrap: fn(String) -> DebuggerEvent,
    inbox: Sender<Input>,
) {
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut carry = Vec::new();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!("Reading debugger output failed: {}", err);
                break;
            }
        };
        carry.extend_from_slice(&chunk[..n]);

        let text = take_utf8(&mut carry);
        if text.is_empty() {
            continue;
        }
        let event = wrap(text);
        if inbox.send(Input::Debugger { generation, event }).await.is_err() {
            return;
        }
    }

    if !carry.is_empty() {
        let event = wrap(String::from_utf8_lossy(&carry).into_owned());
        let _ = inbox.send(Input::Debugger { generation, event }).await;
    }
}

/// Split off the longest decodable prefix, keeping an unfinished character for later.
fn take_utf8(bytes: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(err) if err.error_len().is_none() => err.valid_up_to(),
        Err(_) => bytes.len(),
    };
    let rest = bytes.split_off(valid);
    let text = String::from_utf8_lossy(bytes).into_owned();
    *bytes = rest;
    text
}

/// Wait for the process to exit, killing it when asked to.
async fn supervise(mut child: Child, kill: Receiver<()>, generation: u64, inbox: Sender<Input>) {
    let exited = {
        let status = child.status().fuse();
        let kill_requested = kill.recv().fuse();
        pin_mut!(status, kill_requested);

        select! {
            status = status => Some(status),
            _ = kill_requested => None,
        }
    };

    let status = match exited {
        Some(status) => status,
        None => {
            info!("Killing debugger");
            if let Err(err) = child.kill() {
                warn!("Failed to kill debugger: {}", err);
            }
            child.status().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!("Failed to wait for debugger: {}", err);
            None
        }
    };
    info!("Debugger exited with {:?}", code);

    let _ = inbox
        .send(Input::Debugger {
            generation,
            event: DebuggerEvent::Exited { code },
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unfinished_character_is_carried() {
        let mut bytes = "at ü".as_bytes().to_vec();
        let last = bytes.pop().unwrap();
        assert_eq!(take_utf8(&mut bytes), "at ");
        assert_eq!(bytes.len(), 1);
        bytes.push(last);
        assert_eq!(take_utf8(&mut bytes), "ü");
        assert!(bytes.is_empty());
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut bytes = vec![b'a', 0xff, b'b'];
        assert_eq!(take_utf8(&mut bytes), "a\u{fffd}b");
        assert!(bytes.is_empty());
    }

    #[test]
    fn replies_are_handed_out_in_order() {
        task::block_on(async {
            let (kill_tx, _kill_rx) = channel::bounded(1);
            let lifecycle = Lifecycle::new(Duration::from_secs(1), Duration::from_secs(2));
            let mut process = DebuggerProcess::new(1, Box::new(Vec::<u8>::new()), kill_tx, lifecycle);
            assert!(process.lifecycle().is_running());

            let request = |seq: i64| -> Request {
                serde_json::from_value(serde_json::json!({
                    "seq": seq, "type": "request", "command": "stackTrace"
                }))
                .unwrap()
            };

            for seq in 1..=2 {
                let pending = PendingReply {
                    request: request(seq),
                    kind: ReplyKind::StackTrace,
                };
                process
                    .request(&DebuggerCommand::StackTrace, pending)
                    .await
                    .unwrap();
            }
            let step = PendingReply {
                request: request(3),
                kind: ReplyKind::StackTrace,
            };
            assert!(process.request(&DebuggerCommand::Step, step).await.is_err());

            assert_eq!(process.take_reply().unwrap().request.seq, 1);
            assert_eq!(process.take_reply().unwrap().request.seq, 2);
            assert!(!process.has_pending_reply());
        });
    }

    #[test]
    fn kill_request_reaches_supervisor() {
        let (kill_tx, kill_rx) = channel::bounded(1);
        let lifecycle = Lifecycle::new(Duration::from_secs(1), Duration::from_secs(2));
        let process = DebuggerProcess::new(1, Box::new(Vec::<u8>::new()), kill_tx, lifecycle);
        assert!(process.force_kill());
        assert!(kill_rx.try_recv().is_ok());
    }

    #[cfg(unix)]
    mod with_shell {
        use super::*;
        use std::path::PathBuf;

        use serde_json::json;

        use crate::debug_adapter::{protocol::DebugAdapterMessage, DebugAdapter};

        const FAKE_DEBUGGER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    stacktrace) printf '0 main 10:4\n' ;;
    step) printf 'currently at 11:1\n' ;;
    exit) exit 0 ;;
  esac
done
"#;

        fn script(name: &str, body: &str) -> PathBuf {
            let path = std::env::temp_dir().join(format!("linedap-{}-{}.sh", name, std::process::id()));
            std::fs::write(&path, body).unwrap();
            path
        }

        fn launcher(inbox: Sender<Input>) -> ProcessLauncher {
            let config = Config {
                debugger_path: Some(PathBuf::from("sh")),
                ..Config::default()
            };
            ProcessLauncher::new(config, inbox)
        }

        async fn next_event(inbox: &Receiver<Input>) -> DebuggerEvent {
            let input = async_std::future::timeout(Duration::from_secs(5), inbox.recv())
                .await
                .expect("debugger went quiet")
                .unwrap();
            match input {
                Input::Debugger { generation, event } => {
                    assert_eq!(generation, 7);
                    event
                }
                _ => panic!("unexpected client input"),
            }
        }

        #[test]
        fn talks_to_a_real_process() {
            task::block_on(async {
                let (tx, rx) = channel::unbounded();
                let args = LaunchArguments {
                    program: script("talk", FAKE_DEBUGGER),
                    stop_on_entry: false,
                };
                let mut process = launcher(tx).launch(&args, 7).unwrap();

                process.send(&DebuggerCommand::Step).await.unwrap();
                assert_eq!(
                    next_event(&rx).await,
                    DebuggerEvent::Stdout("currently at 11:1\n".to_owned())
                );

                process.send(&DebuggerCommand::Exit).await.unwrap();
                assert_eq!(
                    next_event(&rx).await,
                    DebuggerEvent::Exited { code: Some(0) }
                );
            });
        }

        #[test]
        fn stubborn_process_is_killed() {
            task::block_on(async {
                let (tx, rx) = channel::unbounded();
                let args = LaunchArguments {
                    program: script("stubborn", "while true; do sleep 1; done\n"),
                    stop_on_entry: false,
                };
                let process = launcher(tx).launch(&args, 7).unwrap();

                assert!(process.force_kill());
                assert!(matches!(
                    next_event(&rx).await,
                    DebuggerEvent::Exited { code: None }
                ));
            });
        }

        #[test]
        fn closed_session_outlives_the_debugger() {
            task::block_on(async {
                let (tx, rx) = channel::unbounded();
                let program = script("orphan", "while true; do sleep 1; done\n");
                let mut adapter = DebugAdapter::new(Vec::<u8>::new(), launcher(tx));

                let launch: Request = serde_json::from_value(json!({
                    "seq": 1, "type": "request", "command": "launch",
                    "arguments": {"program": program},
                }))
                .unwrap();
                let input = Input::Client(DebugAdapterMessage::Request(launch));
                assert!(!adapter.handle_input(input).await.unwrap());
                assert!(!adapter.handle_input(Input::ClientClosed).await.unwrap());

                loop {
                    let input = async_std::future::timeout(Duration::from_secs(5), rx.recv())
                        .await
                        .expect("debugger was not killed")
                        .unwrap();
                    let exited = matches!(
                        input,
                        Input::Debugger {
                            event: DebuggerEvent::Exited { .. },
                            ..
                        }
                    );
                    let finished = adapter.handle_input(input).await.unwrap();
                    assert_eq!(finished, exited);
                    if finished {
                        break;
                    }
                }
            });
        }
    }
}
