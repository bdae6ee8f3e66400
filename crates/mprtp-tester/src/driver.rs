//! Scenario drivers.
//!
//! A driver is built per run from its [`TestSpec`] and owns the logic that
//! actually pushes media through the emulated network. The controller only
//! needs to start it, stop it, and know the worst-case source-to-sink delay
//! so evaluation waits out the last packets.
//!
//! The shipped [`CommandDriver`] spawns an external program with arguments
//! rendered from the spec.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mprtp_scenarios::TestSpec;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::config::CommandConfig;

/// Runs the scenario itself.
#[async_trait]
pub trait TestDriver: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Worst-case end-to-end propagation time over every path.
    fn max_source_to_sink_delay(&self) -> Duration;
}

/// Builds the driver for one run.
pub trait DriverBuilder: Send + Sync {
    fn build(&self, spec: &TestSpec) -> anyhow::Result<Arc<dyn TestDriver>>;
}

/// Worst path delay rounded up to whole seconds.
///
/// Every path carries the same profile, so the subflow count does not
/// change the result.
pub fn max_path_delay(spec: &TestSpec) -> Duration {
    let worst_ms = spec.path().worst_case_delay().as_millis() as u64;
    Duration::from_secs(worst_ms.div_ceil(1000))
}

/// Command-line arguments describing `spec` to a driver program.
pub fn scenario_args(spec: &TestSpec) -> Vec<String> {
    let mut args = vec![
        "--scenario".to_string(),
        spec.key().to_string(),
        "--algorithm".to_string(),
        spec.algorithm().to_string(),
        "--latency".to_string(),
        spec.latency_ms().to_string(),
        "--jitter".to_string(),
        spec.jitter_ms().to_string(),
        "--source".to_string(),
        spec.source().to_string(),
        "--sink".to_string(),
        spec.sink().to_string(),
    ];
    if let Some(n) = spec.subflows() {
        args.push("--subflows".into());
        args.push(n.to_string());
    }
    if spec.tcp() == Some(true) {
        args.push("--tcp".into());
    }
    args
}

/// Drives a run by spawning an external program.
pub struct CommandDriver {
    program: Option<String>,
    args: Vec<String>,
    max_delay: Duration,
    stop_grace: Duration,
    state: Mutex<DriverState>,
}

#[derive(Default)]
struct DriverState {
    child: Option<Child>,
    /// Set by `stop`; a `start` that arrives afterwards must not spawn.
    stopped: bool,
}

impl CommandDriver {
    pub fn new(command: &CommandConfig, spec: &TestSpec, stop_grace: Duration) -> Self {
        let mut args = command.args.clone();
        args.extend(scenario_args(spec));
        Self {
            program: command.program.clone(),
            args,
            max_delay: max_path_delay(spec),
            stop_grace,
            state: Mutex::new(DriverState::default()),
        }
    }
}

#[async_trait]
impl TestDriver for CommandDriver {
    async fn start(&self) -> anyhow::Result<()> {
        let Some(program) = &self.program else {
            tracing::info!("no driver program configured, run is passive");
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if state.stopped {
            tracing::info!("run stopped before the driver launched, not spawning");
            return Ok(());
        }
        if state.child.is_some() {
            anyhow::bail!("driver already running");
        }

        let mut cmd = Command::new(program);
        cmd.args(&self.args).stdin(Stdio::null()).kill_on_drop(true);
        tracing::info!(cmd = ?cmd.as_std(), "spawning scenario driver");
        state.child = Some(cmd.spawn()?);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let child = {
            let mut state = self.state.lock().await;
            state.stopped = true;
            state.child.take()
        };
        let Some(mut child) = child else {
            return Ok(());
        };

        // SIGINT first so the driver can send EOS and tear its pipeline down.
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: `pid` belongs to our own child. If it already exited,
            // kill returns -1 / ESRCH and nothing is signalled.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGINT);
            }
        }

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::info!(%status, "scenario driver exited");
            }
            Err(_) => {
                tracing::warn!("scenario driver didn't exit cleanly, killing");
                child.kill().await?;
            }
        }
        Ok(())
    }

    fn max_source_to_sink_delay(&self) -> Duration {
        self.max_delay
    }
}

/// Builds a [`CommandDriver`] for every run.
pub struct CommandDriverBuilder {
    command: CommandConfig,
    stop_grace: Duration,
}

impl CommandDriverBuilder {
    pub fn new(command: CommandConfig, stop_grace: Duration) -> Self {
        Self {
            command,
            stop_grace,
        }
    }
}

impl DriverBuilder for CommandDriverBuilder {
    fn build(&self, spec: &TestSpec) -> anyhow::Result<Arc<dyn TestDriver>> {
        Ok(Arc::new(CommandDriver::new(
            &self.command,
            spec,
            self.stop_grace,
        )))
    }
}
