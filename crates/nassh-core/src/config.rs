//! Configuration resolution for nassh.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/nassh/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::wire::DEFAULT_WRITE_WINDOW;

/// Complete nassh configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Locations of the plugin binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    pub ssh_client: PathBuf,
    pub mosh_client: PathBuf,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            ssh_client: PathBuf::from("ssh_client"),
            mosh_client: PathBuf::from("mosh_client"),
        }
    }
}

/// Session defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Terminal bytes the plugin may send before waiting for acknowledgement.
    pub write_window: u32,
    pub terminal_profile: String,
    /// Remote command used to start the mosh server.
    pub mosh_server: String,
    /// Extra environment passed to plugins.
    pub environment: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            write_window: DEFAULT_WRITE_WINDOW,
            terminal_profile: "default".to_string(),
            mosh_server: "mosh-server".to_string(),
            environment: BTreeMap::new(),
        }
    }
}

/// Socket relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Serve `openSocket` requests from the host.
    pub enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let global = global_config_path().filter(|p| p.exists());

    // A missing explicit file is an error; a missing global file is not.
    let mut config = load_layered(global.iter().map(PathBuf::as_path).chain(explicit))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Layer config files over the defaults, later files winning field by field.
pub fn load_layered<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Result<Config> {
    let mut layered = Value::Object(Map::new());
    for path in paths {
        merge_value(&mut layered, read_config_value(path)?);
    }
    serde_json::from_value(layered)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".nassh").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/nassh/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("nassh").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    serde_json::from_value(read_config_value(path)?).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn read_config_value(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; anything else
/// replaces what was there.
fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                merge_value(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `NASSH_*` overrides, reading variables through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("NASSH_SSH_CLIENT") {
        config.plugins.ssh_client = PathBuf::from(val);
    }
    if let Some(val) = lookup("NASSH_MOSH_CLIENT") {
        config.plugins.mosh_client = PathBuf::from(val);
    }
    if let Some(val) = lookup("NASSH_MOSH_SERVER") {
        config.session.mosh_server = val;
    }
    if let Some(val) = lookup("NASSH_TERMINAL_PROFILE") {
        config.session.terminal_profile = val;
    }
    if let Some(val) = lookup("NASSH_LOG_LEVEL") {
        config.log.level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_write_window_is_8k() {
        let config = Config::default();
        assert_eq!(config.session.write_window, 8192);
        assert!(!config.relay.enabled);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"plugins":{{"ssh_client":"/opt/nassh/ssh"}}}}"#).unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.plugins.ssh_client, PathBuf::from("/opt/nassh/ssh"));
        assert_eq!(config.plugins.mosh_client, PathBuf::from("mosh_client"));
        assert_eq!(config.session.mosh_server, "mosh-server");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            load_config_file(file.path()),
            Err(Error::Config(_))
        ));
    }

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    #[test]
    fn later_layer_keeps_fields_it_does_not_set() {
        let global = config_file(
            r#"{"plugins":{"ssh_client":"/opt/nassh/ssh"},"session":{"mosh_server":"/usr/local/bin/mosh-server"}}"#,
        );
        let explicit = config_file(
            r#"{"relay":{"enabled":true},"plugins":{"mosh_client":"/opt/nassh/mosh"}}"#,
        );

        let config = load_layered([global.path(), explicit.path()]).unwrap();
        assert_eq!(config.plugins.ssh_client, PathBuf::from("/opt/nassh/ssh"));
        assert_eq!(config.plugins.mosh_client, PathBuf::from("/opt/nassh/mosh"));
        assert_eq!(config.session.mosh_server, "/usr/local/bin/mosh-server");
        assert_eq!(config.session.write_window, 8192);
        assert!(config.relay.enabled);
    }

    #[test]
    fn later_layer_overrides_and_environment_merges() {
        let global = config_file(
            r#"{"session":{"terminal_profile":"dark","environment":{"TERM":"xterm"}}}"#,
        );
        let explicit = config_file(
            r#"{"session":{"terminal_profile":"light","environment":{"LANG":"en_US.UTF-8"}}}"#,
        );

        let config = load_layered([global.path(), explicit.path()]).unwrap();
        assert_eq!(config.session.terminal_profile, "light");
        assert_eq!(config.session.environment.len(), 2);
        assert_eq!(config.session.environment["TERM"], "xterm");
    }

    #[test]
    fn no_layers_gives_defaults() {
        let config = load_layered(std::iter::empty()).unwrap();
        assert_eq!(config.plugins.ssh_client, PathBuf::from("ssh_client"));
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "NASSH_MOSH_SERVER" => Some("/usr/local/bin/mosh-server".into()),
            "NASSH_LOG_LEVEL" => Some("debug".into()),
            _ => None,
        });
        assert_eq!(config.session.mosh_server, "/usr/local/bin/mosh-server");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.plugins.ssh_client, PathBuf::from("ssh_client"));
    }
}
