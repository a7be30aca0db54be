mod commands;
mod config;
mod debug_adapter;
mod debugger;

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Instant;

use async_std::channel;
use async_std::io::{Read, Write};
use async_std::net::{SocketAddr, TcpListener};
use async_std::task;

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::Parser;
use env_logger::{Builder, Target};
use futures::{future, pin_mut, select, FutureExt};
use log::{info, LevelFilter};

use config::Config;
use debug_adapter::{transport, DebugAdapter, Input};
use debugger::ProcessLauncher;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "linedap",
    version,
    about = "A debug adapter for line oriented text debuggers."
)]
pub struct Opt {
    /// Text debugger executable, started as `<debugger> <program> -d`
    #[arg(short = 'd', long = "debugger", env = "DEBUGGER_PATH")]
    debugger: Option<PathBuf>,

    /// Program being debugged, as passed by the editor
    program: Option<PathBuf>,

    /// Working directory of the debugger, defaults to the program's directory
    #[arg(short = 'w', long = "work-directory")]
    work_directory: Option<PathBuf>,

    /// Set log level
    #[arg(short = 'v', long = "verbosity", default_value = "Off")]
    verbosity: LevelFilter,

    /// Serve DAP over TCP on this port instead of stdio
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,

    /// Kill the debugger if it has not exited this long after `exit`
    #[arg(long = "kill-after-ms", default_value_t = 1000)]
    kill_after_ms: u64,

    /// Fail the disconnect if the debugger has not exited by then
    #[arg(long = "exit-deadline-ms", default_value_t = 2000)]
    exit_deadline_ms: u64,
}

fn main() -> Result<()> {
    task::block_on(async_main())
}

async fn async_main() -> Result<()> {
    let opt = Opt::parse();

    // Setup log. Stdout carries the protocol, so logs go to stderr.
    let mut builder = Builder::from_default_env();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {}:{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .filter(None, opt.verbosity)
        .target(Target::Stderr)
        .init();

    let config = Config::new(&opt);
    if config.is_missing_config() {
        log::warn!("{}", config.missing_config_message());
    }

    match opt.port {
        Some(port) => server_mode(config, port).await,
        None => stdio_mode(config).await,
    }
}

/*
 * Serve a single session over the adapter's own stdin and stdout.
 */
async fn stdio_mode(config: Config) -> Result<()> {
    info!("Serving DAP on stdio");
    debug_session(async_std::io::stdin(), async_std::io::stdout(), config).await
}

/*
 * Listen for TCP connections and serve one session per connection, one at a time.
 */
async fn server_mode(config: Config, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Accepted connection from {}", addr);

        debug_session(socket.clone(), socket, config.clone()).await?;
        info!("Debug adapter session stopped");
    }
}

/*
 * Run one debug session.
 *
 * A reader task decodes client messages, the debugger tasks post process
 * output, and both land in one inbox. The loop below is the only place
 * session state changes, and it also wakes up for lifecycle timers.
 */
async fn debug_session<R, W>(reader: R, writer: W, config: Config) -> Result<()>
where
    R: Read + Unpin + Send + 'static,
    W: Write + Unpin,
{
    let (inbox_tx, inbox_rx) = channel::unbounded();

    let client_inbox = inbox_tx.clone();
    task::spawn(async move {
        if let Err(err) = transport::read_messages(reader, client_inbox.clone()).await {
            log::error!("Reading client messages failed: {}", err);
            let _ = client_inbox.send(Input::ClientClosed).await;
        }
    });

    let launcher = ProcessLauncher::new(config, inbox_tx.clone());
    let mut debug_adapter = DebugAdapter::new(writer, launcher);

    // Event loop
    loop {
        let input_task = inbox_rx.recv().fuse();
        let timer_task = wait_until(debug_adapter.next_deadline()).fuse();
        pin_mut!(input_task, timer_task);

        select! {
            input = input_task => {
                let input = input.map_err(|_| anyhow!("Session inbox closed"))?;
                if debug_adapter.handle_input(input).await? {
                    break;
                }
            },
            () = timer_task => {
                if debug_adapter.handle_timer(Instant::now()).await? {
                    break;
                }
            },
        }
    }

    Ok(())
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => task::sleep(at.saturating_duration_since(Instant::now())).await,
        None => future::pending::<()>().await,
    }
}
