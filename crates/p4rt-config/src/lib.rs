//! Configuration for P4Runtime clients.
//!
//! A TOML file with global `[defaults]` and per-device `[devices."<id>"]`
//! overrides, merged with `P4RT_`-prefixed environment variables, and
//! translated to `p4rt_core::ClientConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use p4rt_core::{ClientConfig, DeviceId};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Settings applied to every device.
    #[serde(default)]
    pub defaults: Defaults,

    /// Per-device overrides, keyed by device id.
    #[serde(default)]
    pub devices: HashMap<String, DeviceOverrides>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    /// Deadline of stream open, reads, writes and config queries.
    #[serde(default = "default_short_timeout")]
    pub short_timeout_secs: u64,

    /// Deadline of pipeline config pushes.
    #[serde(default = "default_long_timeout")]
    pub long_timeout_secs: u64,

    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Capacity of the shared event channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            short_timeout_secs: default_short_timeout(),
            long_timeout_secs: default_long_timeout(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_short_timeout() -> u64 {
    p4rt_core::config::SHORT_TIMEOUT.as_secs()
}
fn default_long_timeout() -> u64 {
    p4rt_core::config::LONG_TIMEOUT.as_secs()
}
fn default_outbound_queue_capacity() -> usize {
    p4rt_core::config::OUTBOUND_QUEUE_CAPACITY
}
fn default_event_channel_capacity() -> usize {
    1024
}

/// Settings for one device; unset fields fall back to `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceOverrides {
    pub short_timeout_secs: Option<u64>,
    pub long_timeout_secs: Option<u64>,
    pub outbound_queue_capacity: Option<usize>,
}

impl Config {
    /// Effective client settings for `device_id`.
    pub fn client_config(&self, device_id: &DeviceId) -> Result<ClientConfig, ConfigError> {
        let overrides = self.devices.get(device_id.as_str());
        let pick = |value: Option<u64>, default: u64| value.unwrap_or(default);

        let short = pick(
            overrides.and_then(|o| o.short_timeout_secs),
            self.defaults.short_timeout_secs,
        );
        let long = pick(
            overrides.and_then(|o| o.long_timeout_secs),
            self.defaults.long_timeout_secs,
        );
        let capacity = overrides
            .and_then(|o| o.outbound_queue_capacity)
            .unwrap_or(self.defaults.outbound_queue_capacity);

        non_zero("short_timeout_secs", short, device_id)?;
        non_zero("long_timeout_secs", long, device_id)?;
        non_zero("outbound_queue_capacity", capacity, device_id)?;

        Ok(ClientConfig {
            short_timeout: Duration::from_secs(short),
            long_timeout: Duration::from_secs(long),
            outbound_queue_capacity: capacity,
        })
    }

    pub fn event_channel_capacity(&self) -> Result<usize, ConfigError> {
        if self.defaults.event_channel_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "event_channel_capacity".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(self.defaults.event_channel_capacity)
    }

    /// Check every device section (and the defaults) can produce a usable
    /// client config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.event_channel_capacity()?;
        self.client_config(&DeviceId::new(""))?;
        for device_id in self.devices.keys() {
            self.client_config(&DeviceId::new(device_id.as_str()))?;
        }
        Ok(())
    }
}

fn non_zero<T>(field: &str, value: T, device_id: &DeviceId) -> Result<(), ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: format!("must be greater than zero (device '{device_id}')"),
        });
    }
    Ok(())
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "p4rt", "p4rt").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("p4rt");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment variables use `__` to separate levels, e.g.
/// `P4RT_DEFAULTS__SHORT_TIMEOUT_SECS=5`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("P4RT_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
