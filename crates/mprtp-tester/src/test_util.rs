//! In-process stand-ins for the external collaborators, for tests that
//! exercise the controller without spawning real processes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mprtp_scenarios::{Algorithm, ScenarioParams, ScenarioRegistry, TestSpec};

use crate::driver::{DriverBuilder, TestDriver};
use crate::lifecycle::Collaborators;
use crate::report::{Evaluator, Plotter};
use crate::supervisor::{HelperControl, HelperError};

/// Parameters matching the command-line defaults.
pub fn default_params() -> ScenarioParams {
    ScenarioParams {
        algorithm: Algorithm::Fractal,
        latencies_ms: vec![50],
        jitters_ms: vec![0],
        source: "FILE:Kristen.yuv:1:1280:720:2:25/1".into(),
        sink: "FAKESINK".into(),
        subflows: 2,
        tcp: false,
    }
}

/// Spec for `key` built from [`default_params`].
pub fn spec(key: &str) -> TestSpec {
    ScenarioRegistry::standard()
        .build(key, &default_params())
        .expect("standard scenario")
}

/// Shared log of collaborator calls, in call order.
#[derive(Clone, Default)]
pub struct Probe {
    events: Arc<Mutex<Vec<&'static str>>>,
}

impl Probe {
    fn record(&self, event: &'static str) {
        self.events.lock().expect("probe lock").push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().expect("probe lock").clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    pub fn evaluations(&self) -> usize {
        self.count("evaluate")
    }

    pub fn plots(&self) -> usize {
        self.count("plot")
    }
}

pub struct FakeDriverBuilder {
    pub delay: Duration,
    /// When set, each driver drops one artifact file here on stop.
    pub artifacts_dir: Option<PathBuf>,
    pub probe: Probe,
}

impl DriverBuilder for FakeDriverBuilder {
    fn build(&self, spec: &TestSpec) -> anyhow::Result<Arc<dyn TestDriver>> {
        Ok(Arc::new(FakeDriver {
            delay: self.delay,
            artifact: self
                .artifacts_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}_stats.csv", spec.key()))),
            probe: self.probe.clone(),
        }))
    }
}

pub struct FakeDriver {
    delay: Duration,
    artifact: Option<PathBuf>,
    probe: Probe,
}

#[async_trait]
impl TestDriver for FakeDriver {
    async fn start(&self) -> anyhow::Result<()> {
        self.probe.record("driver.start");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.probe.record("driver.stop");
        if let Some(path) = &self.artifact {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(path, "t,bytes\n")?;
        }
        Ok(())
    }

    fn max_source_to_sink_delay(&self) -> Duration {
        self.delay
    }
}

/// Helpers that only sleep through their settle and drain delays.
pub struct FakeHelpers {
    pub settle: Duration,
    pub drain: Duration,
    pub probe: Probe,
}

#[async_trait]
impl HelperControl for FakeHelpers {
    async fn start(&self) -> Result<(), HelperError> {
        self.probe.record("helpers.start");
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    async fn stop(&self) {
        self.probe.record("helpers.stop");
        tokio::time::sleep(self.drain).await;
    }
}

pub struct FakeReporter {
    pub probe: Probe,
}

#[async_trait]
impl Evaluator for FakeReporter {
    async fn evaluate(&self, _spec: &TestSpec) -> anyhow::Result<()> {
        self.probe.record("evaluate");
        Ok(())
    }
}

#[async_trait]
impl Plotter for FakeReporter {
    async fn plot(&self, _spec: &TestSpec) -> anyhow::Result<()> {
        self.probe.record("plot");
        Ok(())
    }
}

/// Fake collaborators with a 1s settle and 3s drain, sharing one probe.
pub fn fake_collaborators(delay: Duration) -> (Collaborators, Probe) {
    fake_collaborators_with(delay, None)
}

pub fn fake_collaborators_with(
    delay: Duration,
    artifacts_dir: Option<PathBuf>,
) -> (Collaborators, Probe) {
    let probe = Probe::default();
    let reporter = Arc::new(FakeReporter {
        probe: probe.clone(),
    });
    let collaborators = Collaborators {
        builder: Arc::new(FakeDriverBuilder {
            delay,
            artifacts_dir,
            probe: probe.clone(),
        }),
        helpers: Arc::new(FakeHelpers {
            settle: Duration::from_secs(1),
            drain: Duration::from_secs(3),
            probe: probe.clone(),
        }),
        evaluator: reporter.clone(),
        plotter: reporter,
    };
    (collaborators, probe)
}
