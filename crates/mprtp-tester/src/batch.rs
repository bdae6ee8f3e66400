//! Batch runner: every requested scenario key, repeated `runs` times.
//!
//! Scenario keys are resolved before anything is started, so an unknown key
//! aborts the batch without touching a helper process. Cleanup problems of
//! one run are logged and never stop the rest of the batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mprtp_scenarios::{ScenarioError, ScenarioKey, ScenarioParams, ScenarioRegistry, TestSpec};
use thiserror::Error;

use crate::archive::{self, ArchiveReport};
use crate::cancel::CancellationGate;
use crate::config::TesterConfig;
use crate::driver::CommandDriverBuilder;
use crate::lifecycle::{Collaborators, LifecycleController, LifecycleError, StopOutcome, Timing};
use crate::report::CommandReporter;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Produces the collaborators for one run. Called once per run, so nothing
/// a run holds (helper handles, driver state) carries into the next one.
pub trait CollaboratorFactory: Send + Sync {
    fn collaborators(&self) -> Collaborators;
}

/// A fixed set, shared by every run.
impl CollaboratorFactory for Collaborators {
    fn collaborators(&self) -> Collaborators {
        self.clone()
    }
}

/// Real helper processes, driver program and reporters, built fresh per run
/// from the resolved config.
pub struct SystemCollaborators {
    config: TesterConfig,
}

impl SystemCollaborators {
    pub fn new(config: &TesterConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl CollaboratorFactory for SystemCollaborators {
    fn collaborators(&self) -> Collaborators {
        let cfg = &self.config;
        Collaborators {
            builder: Arc::new(CommandDriverBuilder::new(
                cfg.driver.clone(),
                cfg.driver_stop_grace,
            )),
            helpers: Arc::new(ProcessSupervisor::new(
                cfg.helpers.clone(),
                cfg.timing.settle,
                cfg.timing.drain,
            )),
            evaluator: Arc::new(CommandReporter::evaluator(
                cfg.evaluator.clone(),
                cfg.results_dir.clone(),
            )),
            plotter: Arc::new(CommandReporter::plotter(
                cfg.plotter.clone(),
                cfg.results_dir.clone(),
            )),
        }
    }
}

/// What the operator asked for.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub keys: Vec<String>,
    pub runs: u32,
    pub params: ScenarioParams,
}

impl BatchRequest {
    /// Artifacts are archived whenever they would otherwise be overwritten
    /// by a later run of the same batch.
    pub fn archives(&self) -> bool {
        self.runs > 1 || self.keys.len() > 1
    }
}

/// Summary of one finished run.
#[derive(Debug)]
pub struct RunRecord {
    pub key: ScenarioKey,
    pub run_index: u32,
    pub outcome: StopOutcome,
    pub archive: Option<ArchiveReport>,
}

pub struct BatchRunner {
    registry: ScenarioRegistry,
    collaborators: Arc<dyn CollaboratorFactory>,
    gate: Arc<CancellationGate>,
    timing: Timing,
    poll_interval: Duration,
    results_dir: PathBuf,
    archive_root: PathBuf,
    run_id: String,
}

impl BatchRunner {
    pub fn new(
        registry: ScenarioRegistry,
        collaborators: impl CollaboratorFactory + 'static,
        gate: Arc<CancellationGate>,
        config: &TesterConfig,
    ) -> Self {
        Self {
            registry,
            collaborators: Arc::new(collaborators),
            gate,
            timing: config.timing,
            poll_interval: config.poll_interval,
            results_dir: config.results_dir.clone(),
            archive_root: config.archive_root.clone(),
            run_id: archive::run_id(),
        }
    }

    /// Replace the generated per-invocation identifier.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn run(&self, request: &BatchRequest) -> Result<Vec<RunRecord>, BatchError> {
        let specs = self.resolve(request)?;
        let mut records = Vec::with_capacity(specs.len() * request.runs as usize);

        for spec in &specs {
            for run_index in 0..request.runs {
                tracing::info!(
                    scenario = %spec.key(),
                    run = run_index,
                    of = request.runs,
                    run_id = %self.run_id,
                    "run begins"
                );
                let outcome = self.run_once(spec.clone()).await?;

                let archive = request.archives().then(|| {
                    let dir_name = archive::archive_dir_name(
                        request.params.algorithm,
                        &self.run_id,
                        run_index,
                        &request.params.latencies_ms,
                        &request.params.jitters_ms,
                        request.params.subflows,
                    );
                    archive::archive_run(
                        &self.results_dir,
                        &self.archive_root,
                        spec.key(),
                        &dir_name,
                    )
                });

                records.push(RunRecord {
                    key: spec.key(),
                    run_index,
                    outcome,
                    archive,
                });
            }
        }

        Ok(records)
    }

    fn resolve(&self, request: &BatchRequest) -> Result<Vec<TestSpec>, ScenarioError> {
        request
            .keys
            .iter()
            .map(|key| self.registry.build(key, &request.params))
            .collect()
    }

    async fn run_once(&self, spec: TestSpec) -> Result<StopOutcome, LifecycleError> {
        let controller = Arc::new(LifecycleController::new(
            self.collaborators.collaborators(),
            self.timing,
        ));
        controller.setup(spec)?;
        self.gate.attach(controller.clone());

        let result = controller.start().await;
        if result.is_ok() {
            while !controller.is_ended() {
                tracing::info!("run has not finished yet");
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        self.gate.detach();
        result
    }
}
