#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for session orchestration.
//!
//! Plugins are scripted in-process: each fake plugin reads the host's
//! messages and answers over the same channels a real plugin process uses.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nassh_core::wire::{self, InboundMessage, OutboundMessage, SessionArgs, StreamId};
use nassh_host::orchestrator::{
    Handoff, HandoffError, SessionMode, SessionOrchestrator, SessionOutcome, SessionPlan,
    SessionState,
};
use nassh_host::plugin::{PluginConnection, PluginError, PluginEvent, PluginHost, PluginProgram};
use nassh_host::stream::MOSH_PIPE;
use nassh_host::terminal::{MemoryTerminal, TerminalInput};
use tokio::sync::mpsc;

const KEY: &str = "AbCdEfGhIjKlMnOpQrStUw==";

#[derive(Clone)]
enum Script {
    /// Write `output` to the mosh pipe, then exit with `code`.
    Bootstrap { output: String, code: i32 },
    /// Write `text` to the terminal, then exit with `code`.
    Print { text: String, code: i32 },
}

type Launches = Arc<Mutex<Vec<(PluginProgram, SessionArgs)>>>;

struct FakePluginHost {
    primary: Script,
    secondary: Option<Script>,
    launches: Launches,
}

impl FakePluginHost {
    fn new(primary: Script, secondary: Option<Script>) -> Self {
        Self {
            primary,
            secondary,
            launches: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

struct FakePlugin {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::Sender<PluginEvent>,
}

impl FakePlugin {
    async fn send(&self, msg: InboundMessage) {
        self.events.send(PluginEvent::Message(msg)).await.unwrap();
    }

    async fn open_pipe(&mut self) -> StreamId {
        self.send(InboundMessage::OpenFile {
            fd: 5,
            path: MOSH_PIPE.into(),
            mode: 1,
        })
        .await;
        match self.rx.recv().await.unwrap() {
            OutboundMessage::OnOpenFile { fd: 5, stream_id } => stream_id,
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn write_and_wait(&mut self, id: StreamId, bytes: &[u8]) {
        self.send(InboundMessage::Write {
            id,
            data: wire::encode_data(bytes),
        })
        .await;
        match self.rx.recv().await.unwrap() {
            OutboundMessage::OnWriteAcknowledge { id: acked, .. } => assert_eq!(acked, id),
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn play(mut self, program: PluginProgram, script: Script, launches: Launches) {
        let args = match self.rx.recv().await.unwrap() {
            OutboundMessage::StartSession(args) => args,
            other => panic!("unexpected {other:?}"),
        };
        launches.lock().unwrap().push((program, args));

        let code = match script {
            Script::Bootstrap { output, code } => {
                let id = self.open_pipe().await;
                self.write_and_wait(id, output.as_bytes()).await;
                code
            }
            Script::Print { text, code } => {
                self.write_and_wait(1, text.as_bytes()).await;
                code
            }
        };
        self.send(InboundMessage::Exit { code }).await;
    }
}

#[async_trait]
impl PluginHost for FakePluginHost {
    async fn launch(&self, program: PluginProgram) -> Result<PluginConnection, PluginError> {
        let script = match program {
            PluginProgram::Ssh => self.primary.clone(),
            PluginProgram::Mosh => self
                .secondary
                .clone()
                .ok_or(PluginError::Unavailable { program })?,
        };

        let (outbound, rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::channel(16);
        let plugin = FakePlugin {
            rx,
            events: events_tx,
        };
        tokio::spawn(plugin.play(program, script, Arc::clone(&self.launches)));
        Ok(PluginConnection::new(outbound, events))
    }
}

fn mosh_plan() -> SessionPlan {
    let mut environment = BTreeMap::new();
    environment.insert("TERM".to_string(), "xterm-256color".to_string());
    SessionPlan {
        mode: SessionMode::Mosh,
        arguments: vec!["-C".into(), "-t".into(), "user@host".into()],
        environment,
        terminal_profile: Some("solarized".into()),
        ..SessionPlan::default()
    }
}

async fn run(
    host: FakePluginHost,
    plan: SessionPlan,
) -> (SessionOutcome, SessionOrchestrator, Arc<MemoryTerminal>, Launches) {
    let launches = Arc::clone(&host.launches);
    let terminal = Arc::new(MemoryTerminal::new());
    let mut orchestrator = SessionOrchestrator::new(Arc::new(host), terminal.clone(), plan);
    let (_input_tx, mut input) = mpsc::channel::<TerminalInput>(8);
    let outcome = orchestrator.run(&mut input).await;
    (outcome, orchestrator, terminal, launches)
}

#[tokio::test]
async fn primary_failure_flushes_buffered_output() {
    let host = FakePluginHost::new(
        Script::Bootstrap {
            output: "Permission denied (publickey).\r\n".into(),
            code: 2,
        },
        None,
    );
    let (outcome, orchestrator, terminal, launches) = run(host, mosh_plan()).await;

    assert_eq!(outcome, SessionOutcome::Exited(2));
    assert_eq!(outcome.exit_code(), 2);
    assert!(
        orchestrator
            .transitions()
            .contains(&SessionState::PrimaryFailed { code: 2 })
    );
    assert!(orchestrator.state().is_terminal());
    assert!(orchestrator.secondary_handoff().is_none());

    let screen = terminal.contents();
    assert!(screen.starts_with("Loading NaCl plugin... done.\r\n"));
    assert!(screen.contains("Permission denied (publickey)."));
    assert_eq!(launches.lock().unwrap().len(), 1);
    assert_eq!(terminal.profile().as_deref(), Some("solarized"));
}

#[tokio::test]
async fn successful_handoff_starts_mosh_client() {
    let host = FakePluginHost::new(
        Script::Bootstrap {
            output: format!("Welcome to box\nMOSH IP 10.0.0.5\nMOSH CONNECT 60001 {KEY}\n"),
            code: 0,
        },
        Some(Script::Print {
            text: "mosh ready".into(),
            code: 0,
        }),
    );
    let (outcome, orchestrator, terminal, launches) = run(host, mosh_plan()).await;

    assert_eq!(outcome, SessionOutcome::Exited(0));
    assert_eq!(
        orchestrator.secondary_handoff(),
        Some(&Handoff {
            host: "10.0.0.5".into(),
            port: 60001,
            key: KEY.into(),
        })
    );

    let states: Vec<_> = orchestrator
        .transitions()
        .iter()
        .map(std::mem::discriminant)
        .collect();
    let expected = [
        SessionState::Launching,
        SessionState::PrimaryRunning,
        SessionState::AwaitingHandoffParse,
        SessionState::SecondaryRunning {
            handoff: Handoff {
                host: String::new(),
                port: 0,
                key: String::new(),
            },
        },
        SessionState::Terminated(SessionOutcome::Exited(0)),
    ];
    let expected: Vec<_> = expected.iter().map(std::mem::discriminant).collect();
    assert_eq!(states, expected);

    let launches = launches.lock().unwrap();
    assert_eq!(launches.len(), 2);
    let (program, primary) = &launches[0];
    assert_eq!(*program, PluginProgram::Ssh);
    assert_eq!(primary.arguments, vec!["-C", "-t", "user@host"]);
    assert!(!primary.use_js_socket);

    let (program, secondary) = &launches[1];
    assert_eq!(*program, PluginProgram::Mosh);
    assert_eq!(secondary.arguments, vec!["10.0.0.5", "60001"]);
    assert_eq!(secondary.environment.get("MOSH_KEY").map(String::as_str), Some(KEY));
    assert_eq!(
        secondary.environment.get("TERM").map(String::as_str),
        Some("xterm-256color")
    );

    let screen = terminal.contents();
    assert!(screen.contains("Welcome to box\r\n"));
    assert!(!screen.contains("MOSH CONNECT"));
    assert!(screen.ends_with("mosh ready"));
}

#[tokio::test]
async fn missing_connect_line_fails_handoff() {
    let host = FakePluginHost::new(
        Script::Bootstrap {
            output: "MOSH IP 10.0.0.5\n".into(),
            code: 0,
        },
        Some(Script::Print {
            text: "unreachable".into(),
            code: 0,
        }),
    );
    let (outcome, orchestrator, terminal, launches) = run(host, mosh_plan()).await;

    assert_eq!(
        outcome,
        SessionOutcome::HandoffFailed(HandoffError::MissingStartup)
    );
    assert_eq!(outcome.exit_code(), 1);
    assert!(
        orchestrator
            .transitions()
            .contains(&SessionState::AwaitingHandoffParse)
    );
    assert!(
        terminal
            .contents()
            .contains("Did not find mosh server startup message.")
    );
    assert_eq!(launches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_ip_line_fails_handoff() {
    let host = FakePluginHost::new(
        Script::Bootstrap {
            output: format!("MOSH CONNECT 60001 {KEY}\n"),
            code: 0,
        },
        None,
    );
    let (outcome, _, terminal, _) = run(host, mosh_plan()).await;

    assert_eq!(
        outcome,
        SessionOutcome::HandoffFailed(HandoffError::MissingRemoteIp)
    );
    assert!(terminal.contents().contains("Did not find remote IP address"));
}

#[tokio::test]
async fn unavailable_secondary_is_a_launch_failure() {
    let host = FakePluginHost::new(
        Script::Bootstrap {
            output: format!("MOSH IP 10.0.0.5\nMOSH CONNECT 60001 {KEY}\n"),
            code: 0,
        },
        None,
    );
    let (outcome, _, _, _) = run(host, mosh_plan()).await;
    assert_eq!(outcome, SessionOutcome::Exited(-1));
}

#[tokio::test]
async fn ssh_mode_forwards_exit_code() {
    let host = FakePluginHost::new(
        Script::Print {
            text: "hello".into(),
            code: 3,
        },
        None,
    );
    let plan = SessionPlan {
        arguments: vec!["-C".into(), "user@host".into()],
        ..SessionPlan::default()
    };
    let (outcome, orchestrator, terminal, launches) = run(host, plan).await;

    assert_eq!(outcome, SessionOutcome::Exited(3));
    assert!(
        !orchestrator
            .transitions()
            .contains(&SessionState::AwaitingHandoffParse)
    );
    assert_eq!(terminal.contents(), "Loading NaCl plugin... done.\r\nhello");
    assert_eq!(launches.lock().unwrap()[0].1.arguments, vec!["-C", "user@host"]);
}

#[tokio::test]
async fn on_exit_fires_exactly_once() {
    let host = FakePluginHost::new(
        Script::Print {
            text: String::new(),
            code: 0,
        },
        None,
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let terminal = Arc::new(MemoryTerminal::new());
    let mut orchestrator =
        SessionOrchestrator::new(Arc::new(host), terminal, SessionPlan::default())
            .with_on_exit(move |outcome| {
                assert_eq!(outcome, &SessionOutcome::Exited(0));
                seen.fetch_add(1, Ordering::SeqCst);
            });

    let (_input_tx, mut input) = mpsc::channel::<TerminalInput>(8);
    let first = orchestrator.run(&mut input).await;
    let second = orchestrator.run(&mut input).await;

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
