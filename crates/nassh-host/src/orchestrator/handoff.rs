//! Parsing of the mosh-server startup banner.

use std::sync::LazyLock;

use regex::Regex;

static CONNECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^MOSH CONNECT (\d+?) ([A-Za-z0-9/+]{22}(?:==)?)\s*$")
        .expect("static regex is valid")
});
static IP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^MOSH IP (\S+)\s*$").expect("static regex is valid"));

/// Where the mosh client should connect, and the session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub host: String,
    pub port: u16,
    pub key: String,
}

/// Reasons a hand-off could not be extracted from the primary's output.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    #[error("Did not find mosh server startup message.")]
    MissingStartup,

    #[error("Did not find remote IP address")]
    MissingRemoteIp,
}

/// Scan `output` for the `MOSH IP` and `MOSH CONNECT` lines.
///
/// Every other piece between newlines, including a trailing empty one, is
/// passed to `forward` so the user still sees it. The last valid occurrence
/// of each token wins.
pub fn parse_handoff(output: &str, mut forward: impl FnMut(&str)) -> Result<Handoff, HandoffError> {
    let mut host = None;
    let mut connect = None;

    for line in output.split('\n') {
        if let Some(caps) = CONNECT_RE.captures(line)
            && let Ok(port) = caps[1].parse::<u16>()
        {
            connect = Some((port, caps[2].to_string()));
            continue;
        }
        if let Some(caps) = IP_RE.captures(line) {
            host = Some(caps[1].to_string());
            continue;
        }
        forward(line);
    }

    let (port, key) = connect.ok_or(HandoffError::MissingStartup)?;
    let host = host.ok_or(HandoffError::MissingRemoteIp)?;
    Ok(Handoff { host, port, key })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const KEY: &str = "AbCdEfGhIjKlMnOpQrStUw==";

    fn parse(output: &str) -> (Result<Handoff, HandoffError>, Vec<String>) {
        let mut forwarded = Vec::new();
        let result = parse_handoff(output, |line| forwarded.push(line.to_string()));
        (result, forwarded)
    }

    #[test]
    fn extracts_host_port_and_key() {
        let output = format!("motd line\nMOSH IP 10.0.0.5\nMOSH CONNECT 60001 {KEY}\n");
        let (result, forwarded) = parse(&output);
        assert_eq!(
            result.unwrap(),
            Handoff {
                host: "10.0.0.5".into(),
                port: 60001,
                key: KEY.into(),
            }
        );
        assert_eq!(forwarded, vec!["motd line", ""]);
    }

    #[test]
    fn accepts_unpadded_key_and_crlf() {
        let output = "MOSH IP ::1\r\nMOSH CONNECT 60002 AbCdEfGhIjKlMnOpQrStUw\r\n";
        let (result, forwarded) = parse(output);
        let handoff = result.unwrap();
        assert_eq!(handoff.host, "::1");
        assert_eq!(handoff.port, 60002);
        assert_eq!(handoff.key, "AbCdEfGhIjKlMnOpQrStUw");
        assert_eq!(forwarded, vec![""]);
    }

    #[test]
    fn missing_connect_line() {
        let (result, forwarded) = parse("MOSH IP 10.0.0.5\nsomething else\n");
        assert_eq!(result, Err(HandoffError::MissingStartup));
        assert_eq!(forwarded, vec!["something else", ""]);
    }

    #[test]
    fn missing_ip_line() {
        let (result, _) = parse(&format!("MOSH CONNECT 60001 {KEY}\n"));
        assert_eq!(result, Err(HandoffError::MissingRemoteIp));
    }

    #[test]
    fn short_key_is_not_a_connect_line() {
        let (result, forwarded) = parse("MOSH IP 1.2.3.4\nMOSH CONNECT 60001 short");
        assert_eq!(result, Err(HandoffError::MissingStartup));
        assert_eq!(forwarded, vec!["MOSH CONNECT 60001 short"]);
    }

    #[test]
    fn out_of_range_port_keeps_earlier_connect_line() {
        let output =
            format!("MOSH IP 10.0.0.5\nMOSH CONNECT 60001 {KEY}\nMOSH CONNECT 99999 {KEY}");
        let (result, forwarded) = parse(&output);
        assert_eq!(result.unwrap().port, 60001);
        assert_eq!(forwarded, vec![format!("MOSH CONNECT 99999 {KEY}")]);
    }

    #[test]
    fn messages_match_user_text() {
        assert_eq!(
            HandoffError::MissingStartup.to_string(),
            "Did not find mosh server startup message."
        );
        assert_eq!(
            HandoffError::MissingRemoteIp.to_string(),
            "Did not find remote IP address"
        );
    }
}
