//! Scheduler configuration, loadable from a TOML file.

use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Tunables for the cluster scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How long `obtain` waits for a PROVISIONING host to reach RUNNING
    /// before failing with `HostNotReady`.
    pub host_ready_wait: Duration,
    /// How long a caller waits on another request's in-flight image build
    /// before failing with `BuildTimeout`.
    pub build_wait: Duration,
    /// Whether releasing the last container on a host makes that host
    /// eligible for pool shrink. The pool is never shrunk to zero hosts.
    pub remove_empty_hosts: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            host_ready_wait: Duration::from_secs(5 * 60),
            build_wait: Duration::from_secs(15 * 60),
            remove_empty_hosts: false,
        }
    }
}

/// On-disk shape of the config; durations are strings like "30s" or "15m".
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchedulerConfigFile {
    host_ready_wait: Option<String>,
    build_wait: Option<String>,
    remove_empty_hosts: Option<bool>,
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let file: SchedulerConfigFile = toml::from_str(content)?;
        let defaults = Self::default();
        Ok(Self {
            host_ready_wait: file
                .host_ready_wait
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(defaults.host_ready_wait),
            build_wait: file
                .build_wait
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(defaults.build_wait),
            remove_empty_hosts: file
                .remove_empty_hosts
                .unwrap_or(defaults.remove_empty_hosts),
        })
    }
}

/// Parse a duration string like "30s" or "5m" into a `Duration`.
/// A bare number is taken as seconds.
fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (digits, scale) = if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else {
        (s, 1)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid duration {s:?}, expected a number with an optional s or m suffix"))?;
    Ok(Duration::from_secs(value * scale))
}
