//! Configuration file management for adsb-relay.
//!
//! Reads/writes `~/.adsb-relay/config.yaml` with relay server and relay
//! client settings. Command-line flags override whatever is loaded here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tracker::{DEFAULT_CAPACITY, STALE_TIMEOUT};
use crate::types::RelayError;

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

/// Producer side: where consumers connect and how the table is bounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub capacity: usize,
    pub accept_interval: Duration,
    pub write_timeout: Duration,
}

/// Consumer side: upstream relay, staleness policy, reconnect backoff, HTTP export.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub staleness_window: Duration,
    pub cull_interval: Duration,
    pub connect_timeout: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub http_host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".into(),
            port: 1234,
            capacity: DEFAULT_CAPACITY,
            accept_interval: Duration::from_millis(100),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "localhost".into(),
            port: 1234,
            staleness_window: Duration::from_secs_f64(STALE_TIMEOUT),
            cull_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            http_host: "127.0.0.1".into(),
            http_port: 8080,
        }
    }
}

/// Get the config directory path (`~/.adsb-relay/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".adsb-relay")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.adsb-relay/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

/// Load config from an explicit path, falling back to defaults.
pub fn load_config_from(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_config(&text),
        Err(_) => Config::default(),
    }
}

/// Save config to `~/.adsb-relay/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, RelayError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save config to an explicit path, creating parent directories.
pub fn save_config_to(config: &Config, path: &Path) -> Result<(), RelayError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| RelayError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| RelayError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys and bad values keep defaults.
pub fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }

        match current_section.as_deref() {
            Some("server") => {
                let s = &mut config.server;
                match key {
                    "host" => set_string(&mut s.host, val),
                    "port" => set_parsed(&mut s.port, val),
                    "capacity" => set_parsed(&mut s.capacity, val),
                    "accept_interval_ms" => set_millis(&mut s.accept_interval, val),
                    "write_timeout_ms" => set_millis(&mut s.write_timeout, val),
                    _ => {}
                }
            }
            Some("client") => {
                let c = &mut config.client;
                match key {
                    "host" => set_string(&mut c.host, val),
                    "port" => set_parsed(&mut c.port, val),
                    "staleness_secs" => set_secs(&mut c.staleness_window, val),
                    "cull_interval_secs" => set_secs(&mut c.cull_interval, val),
                    "connect_timeout_secs" => set_secs(&mut c.connect_timeout, val),
                    "backoff_initial_ms" => set_millis(&mut c.backoff_initial, val),
                    "backoff_max_ms" => set_millis(&mut c.backoff_max, val),
                    "http_host" => set_string(&mut c.http_host, val),
                    "http_port" => set_parsed(&mut c.http_port, val),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    config
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn set_string(slot: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *slot = v;
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, val: &str) {
    if let Ok(v) = val.parse() {
        *slot = v;
    }
}

fn set_millis(slot: &mut Duration, val: &str) {
    if let Ok(ms) = val.parse::<u64>() {
        *slot = Duration::from_millis(ms);
    }
}

fn set_secs(slot: &mut Duration, val: &str) {
    if let Some(d) = val.parse::<f64>().ok().and_then(|s| Duration::try_from_secs_f64(s).ok()) {
        *slot = d;
    }
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let s = &config.server;
    let c = &config.client;
    let lines = [
        "# adsb-relay configuration".to_string(),
        String::new(),
        "server:".into(),
        format!("  host: \"{}\"", s.host),
        format!("  port: {}", s.port),
        format!("  capacity: {}", s.capacity),
        format!("  accept_interval_ms: {}", s.accept_interval.as_millis()),
        format!("  write_timeout_ms: {}", s.write_timeout.as_millis()),
        String::new(),
        "client:".into(),
        format!("  host: \"{}\"", c.host),
        format!("  port: {}", c.port),
        format!("  staleness_secs: {}", c.staleness_window.as_secs_f64()),
        format!("  cull_interval_secs: {}", c.cull_interval.as_secs_f64()),
        format!("  connect_timeout_secs: {}", c.connect_timeout.as_secs_f64()),
        format!("  backoff_initial_ms: {}", c.backoff_initial.as_millis()),
        format!("  backoff_max_ms: {}", c.backoff_max.as_millis()),
        format!("  http_host: \"{}\"", c.http_host),
        format!("  http_port: {}", c.http_port),
    ];

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
