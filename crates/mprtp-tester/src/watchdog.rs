//! # Watchdog
//!
//! Self-renewing deadline that declares a run stalled when nobody keeps it
//! alive. The remaining timeout is owned by the watchdog task; other
//! contexts only ever send it extensions over a channel.
//!
//! Each tick checks the remaining budget: below the stall threshold the
//! stall callback fires (once) and the watchdog exits; otherwise the budget
//! is captured, reset to zero, and the next tick is scheduled after the
//! captured window. Without keep-alives the watchdog therefore fires exactly
//! one window after it was armed.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Why the watchdog task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    /// The stall callback ran.
    Fired,
    /// The run ended before the deadline.
    Ended,
}

/// Handle to an armed watchdog.
pub struct Watchdog {
    keepalive: mpsc::UnboundedSender<Duration>,
    armed_at: Instant,
    task: JoinHandle<WatchdogExit>,
}

impl Watchdog {
    /// Arm a watchdog with an initial budget of `timeout`.
    ///
    /// `ended` flipping to `true` turns every later tick into a no-op.
    /// `on_stall` runs at most once, from the watchdog task; it should hand
    /// long work off to another task rather than block the tick.
    pub fn arm<F>(
        timeout: Duration,
        threshold: Duration,
        ended: watch::Receiver<bool>,
        on_stall: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (keepalive, rx) = mpsc::unbounded_channel();
        let armed_at = Instant::now();
        let task = tokio::spawn(run(timeout, threshold, ended, rx, on_stall));
        Self {
            keepalive,
            armed_at,
            task,
        }
    }

    /// Top up the remaining budget to at least `budget`.
    pub fn keep_alive(&self, budget: Duration) {
        let _ = self.keepalive.send(budget);
    }

    pub fn armed_at(&self) -> Instant {
        self.armed_at
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watchdog task to finish.
    pub async fn join(self) -> Option<WatchdogExit> {
        self.task.await.ok()
    }
}

async fn run<F>(
    timeout: Duration,
    threshold: Duration,
    mut ended: watch::Receiver<bool>,
    mut keepalive: mpsc::UnboundedReceiver<Duration>,
    on_stall: F,
) -> WatchdogExit
where
    F: FnOnce() + Send + 'static,
{
    let mut remaining = timeout;
    loop {
        if *ended.borrow() {
            return WatchdogExit::Ended;
        }
        if remaining < threshold {
            tracing::warn!("watchdog found a stalled run, forcing stop");
            on_stall();
            return WatchdogExit::Fired;
        }

        let window = std::mem::take(&mut remaining);
        tracing::debug!(window_s = window.as_secs_f64(), "watchdog armed");
        let tick = tokio::time::sleep(window);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                _ = &mut tick => break,
                Some(budget) = keepalive.recv() => {
                    remaining = remaining.max(budget);
                }
                changed = ended.changed() => {
                    if changed.is_err() || *ended.borrow() {
                        return WatchdogExit::Ended;
                    }
                }
            }
        }
    }
}
