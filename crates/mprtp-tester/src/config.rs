//! Tester configuration.
//!
//! The TOML file is read into `*Input` structs where every field is
//! optional, then resolved into a [`TesterConfig`] with concrete values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::lifecycle::Timing;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TesterConfigInput {
    pub version: u32,
    pub helpers: HelpersInput,
    pub timing: TimingInput,
    pub paths: PathsInput,
    pub driver: CommandInput,
    pub evaluator: CommandInput,
    pub plotter: CommandInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HelpersInput {
    pub stats_relay: Option<String>,
    pub stats_relay_args: Option<Vec<String>>,
    pub capture_process: Option<String>,
    pub use_sudo: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimingInput {
    pub settle_secs: Option<u64>,
    pub drain_secs: Option<u64>,
    pub drain_margin_secs: Option<u64>,
    pub watchdog_grace_secs: Option<u64>,
    pub poll_secs: Option<u64>,
    pub driver_stop_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsInput {
    pub results_dir: Option<PathBuf>,
    pub archive_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandInput {
    pub program: Option<String>,
    pub args: Vec<String>,
}

/// Helper processes managed around each run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpersConfig {
    /// Statistics relay binary, launched detached at run start.
    pub stats_relay: String,
    pub stats_relay_args: Vec<String>,
    /// Process name of the packet-capture helper, killed at run stop.
    pub capture_process: String,
    /// Prefix name-based kills with `sudo`.
    pub use_sudo: bool,
}

impl Default for HelpersConfig {
    fn default() -> Self {
        Self {
            stats_relay: "./statsrelayer.out".into(),
            stats_relay_args: vec!["-d".into()],
            capture_process: "tcpdump".into(),
            use_sudo: true,
        }
    }
}

impl HelpersConfig {
    /// Name the relay process is known by, for `pkill` fallbacks.
    pub fn stats_relay_name(&self) -> &str {
        let base = Path::new(&self.stats_relay)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.stats_relay);
        base.strip_suffix(".out").unwrap_or(base)
    }
}

/// External program invoked with rendered arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandConfig {
    pub program: Option<String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TesterConfig {
    pub version: u32,
    pub helpers: HelpersConfig,
    pub timing: Timing,
    /// Interval at which the batch loop polls a run for completion.
    pub poll_interval: Duration,
    /// How long the driver gets to exit after SIGINT before it is killed.
    pub driver_stop_grace: Duration,
    pub results_dir: PathBuf,
    pub archive_root: PathBuf,
    pub driver: CommandConfig,
    pub evaluator: CommandConfig,
    pub plotter: CommandConfig,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            helpers: HelpersConfig::default(),
            timing: Timing::default(),
            poll_interval: Duration::from_secs(10),
            driver_stop_grace: Duration::from_secs(5),
            results_dir: PathBuf::from("temp/"),
            archive_root: PathBuf::from("temp_super/"),
            driver: CommandConfig::default(),
            evaluator: CommandConfig::default(),
            plotter: CommandConfig::default(),
        }
    }
}

impl TesterConfigInput {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("invalid tester config: {e}"))
    }

    pub fn resolve(self) -> Result<TesterConfig, String> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(format!("Unsupported config version {}", version));
        }

        let defaults = TesterConfig::default();

        let helpers = HelpersConfig {
            stats_relay: non_empty(self.helpers.stats_relay)
                .unwrap_or(defaults.helpers.stats_relay),
            stats_relay_args: self
                .helpers
                .stats_relay_args
                .unwrap_or(defaults.helpers.stats_relay_args),
            capture_process: non_empty(self.helpers.capture_process)
                .unwrap_or(defaults.helpers.capture_process),
            use_sudo: self.helpers.use_sudo.unwrap_or(defaults.helpers.use_sudo),
        };

        let secs = |v: Option<u64>, d: Duration| v.map(Duration::from_secs).unwrap_or(d);
        let timing = Timing {
            settle: secs(self.timing.settle_secs, defaults.timing.settle),
            drain: secs(self.timing.drain_secs, defaults.timing.drain),
            drain_margin: secs(self.timing.drain_margin_secs, defaults.timing.drain_margin),
            watchdog_grace: secs(
                self.timing.watchdog_grace_secs,
                defaults.timing.watchdog_grace,
            ),
            stall_threshold: defaults.timing.stall_threshold,
        };

        let poll_interval = secs(self.timing.poll_secs, defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err("timing.poll_secs must be at least 1".into());
        }

        Ok(TesterConfig {
            version,
            helpers,
            timing,
            poll_interval,
            driver_stop_grace: secs(
                self.timing.driver_stop_grace_secs,
                defaults.driver_stop_grace,
            ),
            results_dir: self.paths.results_dir.unwrap_or(defaults.results_dir),
            archive_root: self.paths.archive_root.unwrap_or(defaults.archive_root),
            driver: self.driver.resolve(),
            evaluator: self.evaluator.resolve(),
            plotter: self.plotter.resolve(),
        })
    }
}

impl CommandInput {
    fn resolve(self) -> CommandConfig {
        CommandConfig {
            program: non_empty(self.program),
            args: self.args,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Load and resolve a config file. A missing path yields the defaults.
pub fn load(path: Option<&Path>) -> anyhow::Result<TesterConfig> {
    let input = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            TesterConfigInput::from_toml(&text).map_err(anyhow::Error::msg)?
        }
        None => TesterConfigInput::default(),
    };
    input.resolve().map_err(anyhow::Error::msg)
}
