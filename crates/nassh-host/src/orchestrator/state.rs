//! Session modes, states and outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nassh_core::wire::DEFAULT_WRITE_WINDOW;

use super::handoff::{Handoff, HandoffError};
use crate::relay::Relay;
use crate::terminal::TerminalSize;

/// Exit code reported when the hand-off cannot be parsed.
pub const HANDOFF_FAILED_EXIT_CODE: i32 = 1;
/// Exit code reported when a plugin could not be started at all.
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -1;

/// What kind of session to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Interactive ssh through a single plugin.
    #[default]
    Ssh,
    /// ssh bootstraps a mosh-server, then mosh-client takes over.
    Mosh,
}

/// Everything the orchestrator needs to run one session.
#[derive(Clone, Default)]
pub struct SessionPlan {
    pub mode: SessionMode,
    /// Arguments for the ssh plugin.
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub terminal_size: TerminalSize,
    pub write_window: Option<u32>,
    /// Only honored in ssh mode.
    pub relay: Option<Arc<dyn Relay>>,
    pub terminal_profile: Option<String>,
}

impl SessionPlan {
    pub fn window(&self) -> u32 {
        self.write_window.unwrap_or(DEFAULT_WRITE_WINDOW)
    }
}

impl fmt::Debug for SessionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPlan")
            .field("mode", &self.mode)
            .field("arguments", &self.arguments)
            .field("environment", &self.environment)
            .field("terminal_size", &self.terminal_size)
            .field("write_window", &self.window())
            .field("relay", &self.relay.as_ref().map(|r| r.name()))
            .field("terminal_profile", &self.terminal_profile)
            .finish()
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Exited(i32),
    HandoffFailed(HandoffError),
}

impl SessionOutcome {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::HandoffFailed(_) => HANDOFF_FAILED_EXIT_CODE,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::HandoffFailed(e) => write!(f, "hand-off failed: {e}"),
        }
    }
}

/// Orchestrator lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Launching,
    PrimaryRunning,
    PrimaryFailed { code: i32 },
    AwaitingHandoffParse,
    SecondaryRunning { handoff: Handoff },
    Terminated(SessionOutcome),
}

impl SessionState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_exit_codes() {
        assert_eq!(SessionOutcome::Exited(2).exit_code(), 2);
        assert_eq!(
            SessionOutcome::HandoffFailed(HandoffError::MissingStartup).exit_code(),
            HANDOFF_FAILED_EXIT_CODE
        );
    }

    #[test]
    fn plan_defaults_to_standard_window() {
        let plan = SessionPlan::default();
        assert_eq!(plan.mode, SessionMode::Ssh);
        assert_eq!(plan.window(), 8192);
        assert!(!SessionState::Launching.is_terminal());
        assert!(SessionState::Terminated(SessionOutcome::Exited(0)).is_terminal());
    }
}
