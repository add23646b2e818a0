//! Connection destinations and the ssh plugin command line.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::orchestrator::SessionMode;

static DESTINATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^@]+)@([^:@]+)(?::(\d+))?$").expect("static regex is valid")
});
static ARGSTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)(?:(?:^|\s+)(?:--\s+(.*)))?$").expect("static regex is valid")
});

/// Remote command that starts a mosh server and prints its banner.
const MOSH_SERVER_ARGS: &str = "new -s -c 256";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("Invalid destination '{0}', expected user@host[:port]")]
    Invalid(String),

    #[error("Invalid port '{0}'")]
    InvalidPort(String),
}

/// `user@host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Destination {
    pub fn parse(s: &str) -> Result<Self, DestinationError> {
        let caps = DESTINATION_RE
            .captures(s.trim())
            .ok_or_else(|| DestinationError::Invalid(s.to_string()))?;
        let port = caps
            .get(3)
            .map(|m| {
                m.as_str()
                    .parse::<u16>()
                    .map_err(|_| DestinationError::InvalidPort(m.as_str().to_string()))
            })
            .transpose()?;
        Ok(Self {
            user: caps[1].to_string(),
            host: caps[2].to_string(),
            port,
        })
    }

    /// The banner printed before connecting.
    pub fn connecting_message(&self) -> String {
        format!("Connecting to {}@{}...", self.user, self.host)
    }
}

impl FromStr for Destination {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        Ok(())
    }
}

/// Knobs that shape the ssh plugin's arguments.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub mode: SessionMode,
    /// Key file name under the plugin's `/.ssh` directory.
    pub identity: Option<String>,
    /// Free-form extra ssh arguments; in ssh mode `-- cmd` names a remote command.
    pub extra: Option<String>,
    pub mosh_server: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            mode: SessionMode::Ssh,
            identity: None,
            extra: None,
            mosh_server: "mosh-server".to_string(),
        }
    }
}

fn split_words(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split_whitespace().map(str::to_string)
}

/// Build the argument vector handed to the ssh plugin.
pub fn ssh_arguments(dest: &Destination, opts: &ConnectOptions) -> Vec<String> {
    let mosh = opts.mode == SessionMode::Mosh;
    let mut args = vec!["-C".to_string()];
    if mosh {
        args.push("-t".to_string());
    }

    let mut command = None;
    if let Some(extra) = opts.extra.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        if mosh {
            args.extend(split_words(extra));
        } else if let Some(caps) = ARGSTR_RE.captures(extra) {
            if let Some(head) = caps.get(1) {
                args.extend(split_words(head.as_str()));
            }
            command = caps.get(2).map(|m| m.as_str().to_string());
        }
    }

    if let Some(identity) = &opts.identity {
        args.push(format!("-i/.ssh/{identity}"));
    }
    if let Some(port) = dest.port {
        args.push(format!("-p{port}"));
    }
    args.push(format!("{}@{}", dest.user, dest.host));

    if mosh {
        args.push("--".to_string());
        args.push(format!("{} {MOSH_SERVER_ARGS}", opts.mosh_server));
    } else if let Some(command) = command.filter(|c| !c.is_empty()) {
        args.push(command);
    }
    args
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_destination_with_port() {
        let dest = Destination::parse("alice@example.com:2222").unwrap();
        assert_eq!(dest.user, "alice");
        assert_eq!(dest.host, "example.com");
        assert_eq!(dest.port, Some(2222));
        assert_eq!(dest.to_string(), "alice@example.com:2222");
        assert_eq!(dest.connecting_message(), "Connecting to alice@example.com...");
    }

    #[test]
    fn rejects_malformed_destinations() {
        assert!(matches!(
            Destination::parse("example.com"),
            Err(DestinationError::Invalid(_))
        ));
        assert!(matches!(
            Destination::parse("a@b:99999"),
            Err(DestinationError::InvalidPort(_))
        ));
        assert!("a@b@c".parse::<Destination>().is_err());
    }

    #[test]
    fn plain_ssh_arguments() {
        let dest = Destination::parse("bob@host").unwrap();
        let args = ssh_arguments(&dest, &ConnectOptions::default());
        assert_eq!(args, vec!["-C", "bob@host"]);
    }

    #[test]
    fn extra_arguments_and_remote_command() {
        let dest = Destination::parse("bob@host:22").unwrap();
        let opts = ConnectOptions {
            identity: Some("id_ed25519".into()),
            extra: Some("-v -A -- tmux attach".into()),
            ..ConnectOptions::default()
        };
        assert_eq!(
            ssh_arguments(&dest, &opts),
            vec![
                "-C",
                "-v",
                "-A",
                "-i/.ssh/id_ed25519",
                "-p22",
                "bob@host",
                "tmux attach"
            ]
        );
    }

    #[test]
    fn command_only_extra() {
        let dest = Destination::parse("bob@host").unwrap();
        let opts = ConnectOptions {
            extra: Some("-- uptime".into()),
            ..ConnectOptions::default()
        };
        assert_eq!(ssh_arguments(&dest, &opts), vec!["-C", "bob@host", "uptime"]);
    }

    #[test]
    fn mosh_bootstrap_arguments() {
        let dest = Destination::parse("carol@box:2200").unwrap();
        let opts = ConnectOptions {
            mode: SessionMode::Mosh,
            extra: Some("-v".into()),
            mosh_server: "/usr/local/bin/mosh-server".into(),
            ..ConnectOptions::default()
        };
        assert_eq!(
            ssh_arguments(&dest, &opts),
            vec![
                "-C",
                "-t",
                "-v",
                "-p2200",
                "carol@box",
                "--",
                "/usr/local/bin/mosh-server new -s -c 256"
            ]
        );
    }
}
