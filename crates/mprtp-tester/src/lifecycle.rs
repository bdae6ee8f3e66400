//! # Lifecycle Controller
//!
//! Drives one test run through `Idle → Configured → Running → Stopping →
//! Ended`. Three triggers can end a run: the natural wait for the total
//! duration, the watchdog, and the first termination signal. Whichever wins
//! the race runs the stop sequence; the phase transition into `Stopping` is
//! a compare-and-swap, so the sequence body runs at most once.
//!
//! Stop sequence (strictly ordered): stop the scenario driver → stop the
//! helper processes (includes the drain wait) → evaluate → plot → mark ended.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use mprtp_scenarios::TestSpec;
use thiserror::Error;
use tokio::sync::watch;

use crate::driver::{DriverBuilder, TestDriver};
use crate::report::{Evaluator, Plotter};
use crate::supervisor::HelperControl;
use crate::watchdog::Watchdog;

/// Fixed delays used around a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait after launching helpers before the run proceeds.
    pub settle: Duration,
    /// Wait after terminating helpers so they can flush state.
    pub drain: Duration,
    /// Added to every run on top of scenario and propagation time.
    pub drain_margin: Duration,
    /// Extra budget the watchdog grants beyond the total duration.
    pub watchdog_grace: Duration,
    /// Remaining watchdog budget below which the run counts as stalled.
    pub stall_threshold: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            drain: Duration::from_secs(3),
            drain_margin: Duration::from_secs(2),
            watchdog_grace: Duration::from_secs(60),
            stall_threshold: Duration::from_secs(1),
        }
    }
}

/// External collaborators a controller drives.
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn DriverBuilder>,
    pub helpers: Arc<dyn HelperControl>,
    pub evaluator: Arc<dyn Evaluator>,
    pub plotter: Arc<dyn Plotter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Configured = 1,
    Running = 2,
    Stopping = 3,
    Ended = 4,
}

impl From<u8> for Phase {
    fn from(v: u8) -> Self {
        match v {
            1 => Phase::Configured,
            2 => Phase::Running,
            3 => Phase::Stopping,
            4 => Phase::Ended,
            _ => Phase::Idle,
        }
    }
}

/// What triggered the stop sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The run waited out its total duration.
    Completed,
    /// The watchdog ran out of budget.
    StallDetected,
    /// A termination request arrived.
    Signal,
}

/// Result of a call to [`LifecycleController::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This call ran the stop sequence.
    Ran,
    /// Another trigger got there first.
    AlreadyStopping,
    /// Nothing was set up, so there was nothing to stop.
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("controller is {found:?}, expected {expected:?}")]
    InvalidState { expected: Phase, found: Phase },
    #[error("controller has no test configured")]
    NotConfigured,
    #[error("failed to build scenario driver: {0:#}")]
    Driver(anyhow::Error),
}

struct RunPlan {
    spec: TestSpec,
    driver: Arc<dyn TestDriver>,
    total_duration: Duration,
}

/// Owns one run from setup to the end of its stop sequence.
pub struct LifecycleController {
    collaborators: Collaborators,
    timing: Timing,
    plan: OnceLock<RunPlan>,
    phase: AtomicU8,
    ended: watch::Sender<bool>,
    watchdog: Mutex<Option<Watchdog>>,
}

impl LifecycleController {
    pub fn new(collaborators: Collaborators, timing: Timing) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            collaborators,
            timing,
            plan: OnceLock::new(),
            phase: AtomicU8::new(Phase::Idle as u8),
            ended,
            watchdog: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from(self.phase.load(Ordering::SeqCst))
    }

    pub fn spec(&self) -> Option<&TestSpec> {
        self.plan.get().map(|p| &p.spec)
    }

    /// `base duration + worst source-to-sink delay + drain margin`, once
    /// configured.
    pub fn total_duration(&self) -> Option<Duration> {
        self.plan.get().map(|p| p.total_duration)
    }

    /// Bind a spec, build its driver, and compute the run window.
    pub fn setup(&self, spec: TestSpec) -> Result<Duration, LifecycleError> {
        let found = self.phase();
        if found != Phase::Idle {
            return Err(LifecycleError::InvalidState {
                expected: Phase::Idle,
                found,
            });
        }

        let driver = self
            .collaborators
            .builder
            .build(&spec)
            .map_err(LifecycleError::Driver)?;
        let total_duration =
            spec.base_duration() + driver.max_source_to_sink_delay() + self.timing.drain_margin;

        tracing::info!(
            scenario = %spec.key(),
            algorithm = %spec.algorithm(),
            total_s = total_duration.as_secs(),
            "run configured"
        );

        self.plan
            .set(RunPlan {
                spec,
                driver,
                total_duration,
            })
            .map_err(|_| LifecycleError::InvalidState {
                expected: Phase::Idle,
                found: self.phase(),
            })?;
        self.phase.store(Phase::Configured as u8, Ordering::SeqCst);
        Ok(total_duration)
    }

    /// Run the test: start helpers, arm the watchdog, launch the driver, and
    /// wait out the total duration. Returns once the run has been handed to
    /// the stop sequence, by this call or by another trigger.
    pub async fn start(self: &Arc<Self>) -> Result<StopOutcome, LifecycleError> {
        self.transition(Phase::Configured, Phase::Running)?;
        let plan = self.plan.get().ok_or(LifecycleError::NotConfigured)?;

        if let Err(e) = self.collaborators.helpers.start().await {
            tracing::warn!(error = %e, "helper process failed to start, continuing");
        }
        if self.phase() != Phase::Running {
            return Ok(StopOutcome::AlreadyStopping);
        }

        let weak = Arc::downgrade(self);
        let watchdog = Watchdog::arm(
            plan.total_duration + self.timing.watchdog_grace,
            self.timing.stall_threshold,
            self.ended.subscribe(),
            move || {
                if let Some(ctrl) = weak.upgrade() {
                    tokio::spawn(async move {
                        ctrl.stop(StopCause::StallDetected).await;
                    });
                }
            },
        );
        if let Ok(mut slot) = self.watchdog.lock() {
            *slot = Some(watchdog);
        }

        let driver = plan.driver.clone();
        tokio::spawn(async move {
            if let Err(e) = driver.start().await {
                tracing::warn!(error = %e, "scenario driver failed");
            }
        });

        tracing::info!(
            scenario = %plan.spec.key(),
            total_s = plan.total_duration.as_secs(),
            "run started"
        );

        tokio::select! {
            _ = tokio::time::sleep(plan.total_duration) => {}
            _ = self.wait_ended() => return Ok(StopOutcome::AlreadyStopping),
        }

        Ok(self.stop(StopCause::Completed).await)
    }

    /// Run the stop sequence if no other trigger has started it yet.
    pub async fn stop(&self, cause: StopCause) -> StopOutcome {
        if let Err(outcome) = self.begin_stopping() {
            tracing::debug!(?cause, ?outcome, "stop skipped");
            return outcome;
        }
        let Some(plan) = self.plan.get() else {
            return StopOutcome::NotConfigured;
        };

        match cause {
            StopCause::StallDetected => {
                tracing::warn!(scenario = %plan.spec.key(), "run stalled, stopping")
            }
            _ => tracing::info!(scenario = %plan.spec.key(), ?cause, "stopping run"),
        }

        if let Err(e) = plan.driver.stop().await {
            tracing::warn!(error = %e, "scenario driver did not stop cleanly");
        }
        self.collaborators.helpers.stop().await;

        if let Err(e) = self.collaborators.evaluator.evaluate(&plan.spec).await {
            tracing::warn!(error = %e, "evaluation failed");
        }
        if let Err(e) = self.collaborators.plotter.plot(&plan.spec).await {
            tracing::warn!(error = %e, "plotting failed");
        }

        tracing::info!(description = plan.spec.description(), "run finished");
        self.phase.store(Phase::Ended as u8, Ordering::SeqCst);
        self.ended.send_replace(true);
        StopOutcome::Ran
    }

    /// Stop and wait until the run has ended, even if another trigger owns
    /// the stop sequence.
    pub async fn shutdown(&self, cause: StopCause) {
        if self.stop(cause).await != StopOutcome::NotConfigured {
            self.wait_ended().await;
        }
    }

    pub fn is_ended(&self) -> bool {
        self.phase() == Phase::Ended
    }

    pub async fn wait_ended(&self) {
        let mut rx = self.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }

    /// Top up the watchdog budget. Nothing in the run calls this on its own;
    /// without it the watchdog fires once, `watchdog_grace` after the total
    /// duration.
    pub fn keep_alive(&self, budget: Duration) {
        if let Ok(slot) = self.watchdog.lock() {
            if let Some(dog) = slot.as_ref() {
                dog.keep_alive(budget);
            }
        }
    }

    fn transition(&self, from: Phase, to: Phase) -> Result<(), LifecycleError> {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|found| LifecycleError::InvalidState {
                expected: from,
                found: Phase::from(found),
            })
    }

    fn begin_stopping(&self) -> Result<(), StopOutcome> {
        let mut current = self.phase.load(Ordering::SeqCst);
        loop {
            match Phase::from(current) {
                Phase::Idle => return Err(StopOutcome::NotConfigured),
                Phase::Stopping | Phase::Ended => return Err(StopOutcome::AlreadyStopping),
                Phase::Configured | Phase::Running => {}
            }
            match self.phase.compare_exchange(
                current,
                Phase::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}
