//! Process supervisor for the helper processes that surround a run.
//!
//! The statistics relay is launched detached before the run and its child
//! handle is kept so it can be signalled directly at stop. The packet-capture
//! helper is started by the network setup, not by us, so it can only be
//! stopped by name.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};

use crate::config::HelpersConfig;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to signal {name}: {reason}")]
    Kill { name: String, reason: String },
}

/// Start/stop contract for the helpers around a run.
#[async_trait]
pub trait HelperControl: Send + Sync {
    /// Launch helpers and wait for them to settle.
    async fn start(&self) -> Result<(), HelperError>;

    /// Terminate helpers and wait for them to flush. Never fails; problems
    /// are logged.
    async fn stop(&self);
}

/// Manages the stats relay and packet-capture helpers.
pub struct ProcessSupervisor {
    config: HelpersConfig,
    settle: Duration,
    drain: Duration,
    relay: Mutex<Option<Child>>,
}

impl ProcessSupervisor {
    pub fn new(config: HelpersConfig, settle: Duration, drain: Duration) -> Self {
        Self {
            config,
            settle,
            drain,
            relay: Mutex::new(None),
        }
    }

    fn spawn_relay(&self) -> Result<Child, HelperError> {
        let mut cmd = Command::new(&self.config.stats_relay);
        cmd.args(&self.config.stats_relay_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        tracing::info!(cmd = ?cmd.as_std(), "spawning stats relay");
        cmd.spawn().map_err(|source| HelperError::Spawn {
            program: self.config.stats_relay.clone(),
            source,
        })
    }

    /// SIGTERM the relay we started while it is still our live child.
    /// Otherwise (spawn failed, or it daemonized and the launcher already
    /// exited) stop it by name.
    async fn stop_relay(&self) -> Result<(), HelperError> {
        let child = self.relay.lock().ok().and_then(|mut slot| slot.take());
        let name = self.config.stats_relay_name().to_string();

        if let Some(mut child) = child {
            match child.try_wait() {
                Ok(None) => {
                    if let Some(pid) = child.id() {
                        tracing::debug!(pid, "terminating stats relay by handle");
                        terminate_pid(pid).map_err(|e| HelperError::Kill {
                            name: name.clone(),
                            reason: e.to_string(),
                        })?;
                        // Reap in the background so the relay does not linger as a zombie.
                        tokio::spawn(async move {
                            let _ = child.wait().await;
                        });
                        return Ok(());
                    }
                }
                Ok(Some(status)) => {
                    tracing::debug!(%status, "stats relay launcher already exited");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "could not poll stats relay");
                }
            }
        }
        self.kill_by_name(&name, Some("SIGTERM")).await
    }

    async fn kill_by_name(&self, name: &str, signal: Option<&str>) -> Result<(), HelperError> {
        let mut cmd = if self.config.use_sudo {
            let mut c = Command::new("sudo");
            c.arg("pkill");
            c
        } else {
            Command::new("pkill")
        };
        if let Some(signal) = signal {
            cmd.arg("--signal").arg(signal);
        }
        cmd.arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = cmd.status().await.map_err(|e| HelperError::Kill {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        match status.code() {
            Some(0) => Ok(()),
            // pkill exits 1 when nothing matched.
            Some(1) => {
                tracing::debug!(name, "no process matched");
                Ok(())
            }
            _ => Err(HelperError::Kill {
                name: name.to_string(),
                reason: format!("pkill exited with {status}"),
            }),
        }
    }
}

#[async_trait]
impl HelperControl for ProcessSupervisor {
    async fn start(&self) -> Result<(), HelperError> {
        let child = self.spawn_relay()?;
        if let Ok(mut slot) = self.relay.lock() {
            *slot = Some(child);
        }
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn stop(&self) {
        let capture = self.config.capture_process.clone();
        if let Err(e) = self.kill_by_name(&capture, None).await {
            tracing::warn!(error = %e, "failed to stop packet capture");
        }
        if let Err(e) = self.stop_relay().await {
            tracing::warn!(error = %e, "failed to stop stats relay");
        }
        tokio::time::sleep(self.drain).await;
        tracing::info!("helpers stopped");
    }
}

#[cfg(unix)]
fn terminate_pid(pid: u32) -> std::io::Result<()> {
    // SAFETY: `pid` is the id of a child we spawned and still hold. If it
    // already exited, kill returns -1 / ESRCH and nothing is signalled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate_pid(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::other("signals are only supported on unix"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(relay: &str) -> HelpersConfig {
        HelpersConfig {
            stats_relay: relay.into(),
            stats_relay_args: vec![],
            capture_process: "mprtp-no-such-capture".into(),
            use_sudo: false,
        }
    }

    #[tokio::test]
    async fn missing_relay_binary_is_a_spawn_error() {
        let sup = ProcessSupervisor::new(
            config("/nonexistent/statsrelayer.out"),
            Duration::ZERO,
            Duration::ZERO,
        );
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, HelperError::Spawn { .. }));
        assert!(err.to_string().contains("statsrelayer"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_the_owned_relay() {
        let mut cfg = config("sleep");
        cfg.stats_relay_args = vec!["30".into()];
        let sup = ProcessSupervisor::new(cfg, Duration::ZERO, Duration::from_millis(50));
        sup.start().await.unwrap();
        assert!(sup.relay.lock().unwrap().is_some());
        sup.stop().await;
        assert!(sup.relay.lock().unwrap().is_none());
    }

    #[cfg(unix)]
    async fn running(name: &str) -> bool {
        Command::new("pgrep")
            .arg("-x")
            .arg(name)
            .stdout(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relay_that_daemonizes_is_stopped_by_name() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let relay = dir.path().join("mprtpfxrelay");
        std::fs::write(
            &relay,
            "#!/bin/sh\nif [ \"$1\" = bg ]; then\n  while :; do sleep 1; done\nfi\n\"$0\" bg &\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&relay, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sup = ProcessSupervisor::new(
            config(relay.to_str().unwrap()),
            Duration::from_millis(300),
            Duration::from_millis(300),
        );
        sup.start().await.unwrap();
        assert!(running("mprtpfxrelay").await, "background relay never started");

        sup.stop().await;
        assert!(
            !running("mprtpfxrelay").await,
            "background relay survived stop"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_without_helpers_is_harmless() {
        let sup = ProcessSupervisor::new(
            config("mprtp-no-such-relay"),
            Duration::ZERO,
            Duration::ZERO,
        );
        // Nothing started, nothing matches: must complete without panicking.
        sup.stop().await;
    }
}
