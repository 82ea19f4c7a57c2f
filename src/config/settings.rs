use super::env_loader::load_optional_env_file;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "data/local_nexus.db";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5010;
pub const DEFAULT_PORT_RANGE_START: u16 = 3000;
pub const DEFAULT_PORT_RANGE_END: u16 = 3999;
pub const DEFAULT_LOG_DIR: &str = "data/logs";
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 10;

/// Host used for spawned processes, port probes, and URLs the controller writes.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Inclusive port range scanned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end {
            return Err(Error::Config(format!(
                "Port range start {} is greater than end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_PORT_RANGE_START,
            end: DEFAULT_PORT_RANGE_END,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Controller settings, read from `LOCAL_NEXUS_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Directory relative paths are resolved against.
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
    pub host: String,
    /// The controller's own port; always reserved.
    pub port: u16,
    pub port_range: PortRange,
    pub log_dir: PathBuf,
    pub watch_interval: Duration,
}

impl Settings {
    /// Defaults rooted at `base_dir`, with no environment applied.
    pub fn defaults(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            db_path: base_dir.join(DEFAULT_DB_PATH),
            log_dir: base_dir.join(DEFAULT_LOG_DIR),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            port_range: PortRange::default(),
            watch_interval: Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS),
            base_dir,
        }
    }

    /// Read settings from the process environment, falling back to
    /// `<base_dir>/.env`, then to defaults.
    pub fn from_env(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        let file_vars = load_optional_env_file(&base_dir)?;
        Self::from_lookup(base_dir, |key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_vars.get(key).cloned())
        })
    }

    /// Build settings from an arbitrary key lookup.
    ///
    /// Unparseable integers fall back to their default with a warning. An
    /// inverted port range is a configuration error.
    pub fn from_lookup<F>(base_dir: impl Into<PathBuf>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::defaults(base_dir);

        if let Some(path) = non_empty(lookup("LOCAL_NEXUS_DB_PATH")) {
            settings.db_path = resolve(&settings.base_dir, &path);
        }
        if let Some(host) = non_empty(lookup("LOCAL_NEXUS_HOST")) {
            settings.host = host;
        }
        if let Some(dir) = non_empty(lookup("LOCAL_NEXUS_LOG_DIR")) {
            settings.log_dir = resolve(&settings.base_dir, &dir);
        }

        settings.port = parse_or_default(&lookup, "LOCAL_NEXUS_PORT", DEFAULT_PORT);
        let start = parse_or_default(
            &lookup,
            "LOCAL_NEXUS_PORT_RANGE_START",
            DEFAULT_PORT_RANGE_START,
        );
        let end = parse_or_default(&lookup, "LOCAL_NEXUS_PORT_RANGE_END", DEFAULT_PORT_RANGE_END);
        settings.port_range = PortRange::new(start, end)?;

        let secs = parse_or_default(
            &lookup,
            "LOCAL_NEXUS_WATCH_INTERVAL_SECS",
            DEFAULT_WATCH_INTERVAL_SECS,
        );
        settings.watch_interval = Duration::from_secs(secs.max(1));

        Ok(settings)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            controller_port: self.port,
            log_dir: self.log_dir.clone(),
            ..SupervisorConfig::default()
        }
    }
}

/// Timeouts and paths the process supervisor runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    pub controller_port: u16,
    pub log_dir: PathBuf,
    /// Bound on a custom `stop_command`.
    pub stop_command_timeout: Duration,
    /// Bound on a custom `restart_command`.
    pub restart_command_timeout: Duration,
    /// Time allowed between SIGTERM and SIGKILL.
    pub terminate_grace: Duration,
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            controller_port: DEFAULT_PORT,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            stop_command_timeout: Duration::from_secs(30),
            restart_command_timeout: Duration::from_secs(60),
            terminate_grace: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(250),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy + fmt::Display,
{
    match non_empty(lookup(key)) {
        None => default,
        Some(raw) => match raw.parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(
                    "Ignoring invalid value '{}' for {}; using default {}",
                    raw,
                    key,
                    default
                );
                default
            }
        },
    }
}

/// Helper for tests and embedders that hold settings as a plain map.
pub fn settings_from_map(base_dir: impl Into<PathBuf>, vars: &HashMap<String, String>) -> Result<Settings> {
    Settings::from_lookup(base_dir, |key| vars.get(key).cloned())
}
