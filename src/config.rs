use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::containers::ranges::DEFAULT_ACTIVE_PRIORITY;

/// Capacity of the channel between a log source task and the feeder
pub const DEFAULT_CHANNEL_BUFFER: usize = 1000;

/// Leading timestamp layout understood by the file source
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Configuration for bark-containers consumers
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Bounded capacity of each source's event channel
    pub channel_buffer: usize,
    /// Compare re-delivered tail messages by text only
    pub ignore_message_time_for_hash: bool,
    /// Priority assigned to active windows
    pub active_priority: i32,
    /// chrono format of the timestamp at the start of each line
    pub timestamp_format: String,
    /// tracing filter used when RUST_LOG is not set
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
            ignore_message_time_for_hash: false,
            active_priority: DEFAULT_ACTIVE_PRIORITY,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then the config file if there is one, then environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path().filter(|p| p.exists()) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// `$BARK_CONFIG`, else `<config dir>/bark/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        std::env::var_os("BARK_CONFIG")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join("bark").join("config.toml")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `BARK_*` overrides found through `lookup`. Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(n) = lookup("BARK_CHANNEL_BUFFER").and_then(|s| s.parse().ok()) {
            self.channel_buffer = n;
        }
        if let Some(flag) = lookup("BARK_IGNORE_TIME_IN_HASH").and_then(|s| parse_flag(&s)) {
            self.ignore_message_time_for_hash = flag;
        }
        if let Some(format) = lookup("BARK_TIMESTAMP_FORMAT").filter(|s| !s.is_empty()) {
            self.timestamp_format = format;
        }
        if let Some(filter) = lookup("BARK_LOG").filter(|s| !s.is_empty()) {
            self.log_filter = filter;
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
