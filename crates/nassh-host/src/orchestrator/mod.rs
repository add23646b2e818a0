//! Session orchestration.
//!
//! An ssh session runs one plugin to completion. A mosh session runs the ssh
//! plugin first to start `mosh-server` on the remote side, captures its
//! output through [`MOSH_PIPE`], and then hands the terminal over to the mosh
//! client using the address and key printed by the server.

mod handoff;
mod state;

pub use handoff::{Handoff, HandoffError, parse_handoff};
pub use state::{
    HANDOFF_FAILED_EXIT_CODE, LAUNCH_FAILED_EXIT_CODE, SessionMode, SessionOutcome, SessionPlan,
    SessionState,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelOptions, PathResolver, SessionChannel};
use crate::plugin::{PluginHost, PluginProgram};
use crate::stream::{DEV_RANDOM, DEV_URANDOM, MOSH_PIPE, PipeBuffer, StreamKind};
use crate::terminal::{PLUGIN_LOADING, PLUGIN_LOADING_COMPLETE, TerminalInput, TerminalSink};

/// Environment variable carrying the mosh session key to the client.
pub const MOSH_KEY_ENV: &str = "MOSH_KEY";

/// Invoked once with the final outcome.
pub type ExitCallback = Box<dyn FnOnce(&SessionOutcome) + Send>;

fn random_resolver() -> PathResolver {
    Arc::new(|path: &str| match path {
        DEV_RANDOM | DEV_URANDOM => Some(StreamKind::Random),
        _ => None,
    })
}

fn bootstrap_resolver(buffer: PipeBuffer) -> PathResolver {
    Arc::new(move |path: &str| match path {
        DEV_RANDOM | DEV_URANDOM => Some(StreamKind::Random),
        MOSH_PIPE => Some(StreamKind::Pipe(buffer.clone())),
        _ => None,
    })
}

/// Runs a session's plugins in sequence and reports how it ended.
pub struct SessionOrchestrator {
    host: Arc<dyn PluginHost>,
    terminal: Arc<dyn TerminalSink>,
    plan: SessionPlan,
    state: SessionState,
    transitions: Vec<SessionState>,
    on_exit: Option<ExitCallback>,
}

impl SessionOrchestrator {
    pub fn new(host: Arc<dyn PluginHost>, terminal: Arc<dyn TerminalSink>, plan: SessionPlan) -> Self {
        Self {
            host,
            terminal,
            plan,
            state: SessionState::Launching,
            transitions: vec![SessionState::Launching],
            on_exit: None,
        }
    }

    #[must_use]
    pub fn with_on_exit(mut self, on_exit: impl FnOnce(&SessionOutcome) + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(on_exit));
        self
    }

    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Every state entered so far, in order.
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    /// The hand-off the secondary plugin was started with, if any.
    pub fn secondary_handoff(&self) -> Option<&Handoff> {
        self.transitions.iter().find_map(|state| match state {
            SessionState::SecondaryRunning { handoff } => Some(handoff),
            _ => None,
        })
    }

    /// Run the session to completion.
    ///
    /// Calling `run` again after the session terminated returns the same
    /// outcome without running anything.
    pub async fn run(&mut self, input: &mut mpsc::Receiver<TerminalInput>) -> SessionOutcome {
        if let SessionState::Terminated(outcome) = &self.state {
            return outcome.clone();
        }

        if let Some(profile) = &self.plan.terminal_profile {
            self.terminal.set_terminal_profile(profile);
        }

        let outcome = match self.plan.mode {
            SessionMode::Ssh => self.run_ssh(input).await,
            SessionMode::Mosh => self.run_mosh(input).await,
        };
        self.finish(outcome)
    }

    async fn run_ssh(&mut self, input: &mut mpsc::Receiver<TerminalInput>) -> SessionOutcome {
        let options = ChannelOptions {
            arguments: self.plan.arguments.clone(),
            environment: self.plan.environment.clone(),
            terminal_size: self.plan.terminal_size,
            write_window: self.plan.window(),
            path_resolver: Some(random_resolver()),
            relay: self.plan.relay.clone(),
        };
        match self.launch(PluginProgram::Ssh, options, input).await {
            Some(code) => SessionOutcome::Exited(code),
            None => SessionOutcome::Exited(LAUNCH_FAILED_EXIT_CODE),
        }
    }

    async fn run_mosh(&mut self, input: &mut mpsc::Receiver<TerminalInput>) -> SessionOutcome {
        if self.plan.relay.is_some() {
            debug!("Relay is ignored during mosh bootstrap");
        }

        let buffer = PipeBuffer::new();
        let options = ChannelOptions {
            arguments: self.plan.arguments.clone(),
            environment: self.plan.environment.clone(),
            terminal_size: self.plan.terminal_size,
            write_window: self.plan.window(),
            path_resolver: Some(bootstrap_resolver(buffer.clone())),
            relay: None,
        };
        let Some(code) = self.launch(PluginProgram::Ssh, options, input).await else {
            return SessionOutcome::Exited(LAUNCH_FAILED_EXIT_CODE);
        };

        if code != 0 {
            self.terminal.write(&buffer.contents());
            self.transition(SessionState::PrimaryFailed { code });
            return SessionOutcome::Exited(code);
        }

        self.transition(SessionState::AwaitingHandoffParse);
        let output = String::from_utf8_lossy(&buffer.contents()).into_owned();
        let terminal = Arc::clone(&self.terminal);
        let handoff = match parse_handoff(&output, |line| terminal.println(line)) {
            Ok(handoff) => handoff,
            Err(e) => {
                warn!(error = %e, "mosh hand-off failed");
                self.terminal.println(&e.to_string());
                return SessionOutcome::HandoffFailed(e);
            }
        };

        info!(host = %handoff.host, port = handoff.port, "Handing off to mosh client");
        let mut environment: BTreeMap<String, String> = self.plan.environment.clone();
        environment.insert(MOSH_KEY_ENV.to_string(), handoff.key.clone());
        let options = ChannelOptions {
            arguments: vec![handoff.host.clone(), handoff.port.to_string()],
            environment,
            terminal_size: self.plan.terminal_size,
            write_window: self.plan.window(),
            path_resolver: Some(random_resolver()),
            relay: None,
        };
        self.transition(SessionState::SecondaryRunning { handoff });

        match self.launch(PluginProgram::Mosh, options, input).await {
            Some(code) => SessionOutcome::Exited(code),
            None => SessionOutcome::Exited(LAUNCH_FAILED_EXIT_CODE),
        }
    }

    /// Start a plugin and run its channel. `None` if the plugin never started.
    async fn launch(
        &mut self,
        program: PluginProgram,
        options: ChannelOptions,
        input: &mut mpsc::Receiver<TerminalInput>,
    ) -> Option<i32> {
        self.terminal.print(PLUGIN_LOADING);
        let mut conn = match self.host.launch(program).await {
            Ok(conn) => conn,
            Err(e) => {
                error!(%program, error = %e, "Plugin launch failed");
                self.terminal.println(&e.to_string());
                return None;
            }
        };
        self.terminal.println(PLUGIN_LOADING_COMPLETE);

        if program == PluginProgram::Ssh {
            self.transition(SessionState::PrimaryRunning);
        }

        let channel = SessionChannel::new(conn.outbound.clone(), Arc::clone(&self.terminal), options);
        let code = channel.run(&mut conn.events, input).await;
        conn.terminate();
        info!(%program, code, "Plugin finished");
        Some(code)
    }

    fn transition(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "Session state change");
        self.state = state.clone();
        self.transitions.push(state);
    }

    fn finish(&mut self, outcome: SessionOutcome) -> SessionOutcome {
        info!(%outcome, "Session terminated");
        self.transition(SessionState::Terminated(outcome.clone()));
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(&outcome);
        }
        outcome
    }
}
