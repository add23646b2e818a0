//! nassh
//!
//! Connects the local terminal to an ssh or mosh plugin process.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use nassh_core::Config;
use nassh_core::config::load_config;
use nassh_core::tracing_init::init_tracing;
use nassh_host::destination::{ConnectOptions, Destination, ssh_arguments};
use nassh_host::orchestrator::{SessionMode, SessionOrchestrator, SessionPlan};
use nassh_host::plugin::ProcessPluginHost;
use nassh_host::relay::{Relay, TcpRelay};
use nassh_host::terminal::{StdoutTerminal, TerminalInput, TerminalSink, TerminalSize};

const INPUT_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "nassh")]
#[command(version, about = "ssh and mosh through plugin clients", long_about = None)]
struct Cli {
    /// Where to connect: user@host[:port]
    destination: String,

    /// Bootstrap a mosh session over ssh
    #[arg(long)]
    mosh: bool,

    /// Identity file name under the plugin's /.ssh directory
    #[arg(short, long)]
    identity: Option<String>,

    /// Serve plugin sockets from this process
    #[arg(long)]
    relay: bool,

    /// ssh plugin binary
    #[arg(long)]
    ssh_client: Option<PathBuf>,

    /// mosh plugin binary
    #[arg(long)]
    mosh_client: Option<PathBuf>,

    /// Remote command that starts the mosh server
    #[arg(long)]
    mosh_server: Option<String>,

    /// Terminal profile name
    #[arg(long)]
    terminal_profile: Option<String>,

    /// Config file layered over the global settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Extra ssh arguments; in ssh mode anything after a second `--` is the remote command
    #[arg(last = true)]
    extra: Vec<String>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.ssh_client {
            config.plugins.ssh_client.clone_from(path);
        }
        if let Some(path) = &self.mosh_client {
            config.plugins.mosh_client.clone_from(path);
        }
        if let Some(server) = &self.mosh_server {
            config.session.mosh_server.clone_from(server);
        }
        if let Some(profile) = &self.terminal_profile {
            config.session.terminal_profile.clone_from(profile);
        }
        if self.relay {
            config.relay.enabled = true;
        }
        if self.log_json {
            config.log.json = true;
        }
    }
}

/// Keeps the terminal in raw mode for as long as it lives.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> std::io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

fn spawn_stdin_reader(tx: mpsc::Sender<TerminalInput>) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx
                        .send(TerminalInput::Keystrokes(buf[..n].to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read terminal input");
                    break;
                }
            }
        }
        debug!("Terminal input reader finished");
    });
}

#[cfg(unix)]
fn spawn_resize_watcher(tx: mpsc::Sender<TerminalInput>) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut winch = match signal(SignalKind::window_change()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Cannot watch terminal resizes");
                return;
            }
        };
        while winch.recv().await.is_some() {
            match crossterm::terminal::size() {
                Ok((width, height)) => {
                    let size = TerminalSize { width, height };
                    if tx.send(TerminalInput::Resize(size)).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!(error = %e, "Failed to query terminal size"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_resize_watcher(_tx: mpsc::Sender<TerminalInput>) {}

/// Map a session exit code onto a process status.
const fn process_status(code: i32) -> i32 {
    if code < 0 { 255 } else { code }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    init_tracing(&config.log.level, config.log.json);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting nassh");

    let destination = Destination::parse(&cli.destination)?;
    let mode = if cli.mosh {
        SessionMode::Mosh
    } else {
        SessionMode::Ssh
    };

    let connect = ConnectOptions {
        mode,
        identity: cli.identity.clone(),
        extra: (!cli.extra.is_empty()).then(|| cli.extra.join(" ")),
        mosh_server: config.session.mosh_server.clone(),
    };
    let relay: Option<Arc<dyn Relay>> = if config.relay.enabled {
        Some(Arc::new(TcpRelay::new()))
    } else {
        None
    };
    let terminal_size = crossterm::terminal::size()
        .map(|(width, height)| TerminalSize { width, height })
        .unwrap_or_default();

    let plan = SessionPlan {
        mode,
        arguments: ssh_arguments(&destination, &connect),
        environment: config.session.environment.clone(),
        terminal_size,
        write_window: Some(config.session.write_window),
        relay,
        terminal_profile: Some(config.session.terminal_profile.clone()),
    };
    debug!(?plan, "Session plan");

    let terminal: Arc<dyn TerminalSink> = Arc::new(StdoutTerminal::new());
    terminal.println(&destination.connecting_message());

    let host = Arc::new(ProcessPluginHost::new(&config.plugins));
    let mut orchestrator = SessionOrchestrator::new(host, Arc::clone(&terminal), plan)
        .with_on_exit(|outcome| info!(%outcome, "Session finished"));

    let (input_tx, mut input_rx) = mpsc::channel(INPUT_CAPACITY);
    spawn_stdin_reader(input_tx.clone());
    spawn_resize_watcher(input_tx);

    let outcome = {
        let _raw = if std::io::stdin().is_terminal() {
            Some(RawModeGuard::enable()?)
        } else {
            None
        };
        orchestrator.run(&mut input_rx).await
    };

    // The blocking stdin read would hold up runtime shutdown.
    std::process::exit(process_status(outcome.exit_code()));
}
