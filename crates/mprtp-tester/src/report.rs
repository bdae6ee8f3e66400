//! Post-run evaluation and plotting.
//!
//! Both steps are external tools. The controller hands them the finished
//! [`TestSpec`]; [`CommandReporter`] serializes it next to the run artifacts
//! and invokes the configured program on the results directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use mprtp_scenarios::TestSpec;
use tokio::process::Command;

use crate::config::CommandConfig;

/// File the spec is written to inside the results directory.
pub const SPEC_FILE: &str = "test_spec.json";

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, spec: &TestSpec) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Plotter: Send + Sync {
    async fn plot(&self, spec: &TestSpec) -> anyhow::Result<()>;
}

/// Runs an external evaluator or plotter program.
pub struct CommandReporter {
    role: &'static str,
    command: CommandConfig,
    results_dir: PathBuf,
}

impl CommandReporter {
    pub fn evaluator(command: CommandConfig, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: "evaluator",
            command,
            results_dir: results_dir.into(),
        }
    }

    pub fn plotter(command: CommandConfig, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            role: "plotter",
            command,
            results_dir: results_dir.into(),
        }
    }

    async fn run(&self, spec: &TestSpec) -> anyhow::Result<()> {
        let Some(program) = &self.command.program else {
            tracing::debug!(role = self.role, "no program configured, skipping");
            return Ok(());
        };

        let spec_path = write_spec(&self.results_dir, spec)?;
        let status = Command::new(program)
            .args(&self.command.args)
            .arg("--target")
            .arg(&self.results_dir)
            .arg("--spec")
            .arg(&spec_path)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            anyhow::bail!("{} {program} exited with {status}", self.role);
        }
        tracing::info!(role = self.role, scenario = %spec.key(), "report generated");
        Ok(())
    }
}

#[async_trait]
impl Evaluator for CommandReporter {
    async fn evaluate(&self, spec: &TestSpec) -> anyhow::Result<()> {
        self.run(spec).await
    }
}

#[async_trait]
impl Plotter for CommandReporter {
    async fn plot(&self, spec: &TestSpec) -> anyhow::Result<()> {
        self.run(spec).await
    }
}

/// Serialize `spec` into `dir`, creating the directory if needed.
pub fn write_spec(dir: &Path, spec: &TestSpec) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(SPEC_FILE);
    std::fs::write(&path, serde_json::to_vec_pretty(spec)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::spec;

    #[test]
    fn spec_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("temp");
        let path = write_spec(&target, &spec("mprtp5")).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["key"], "mprtp5");
        assert_eq!(value["algorithm"], "FRACTaL");
        assert_eq!(value["subflows"], 2);
        assert_eq!(value["tcp"], false);
    }

    #[tokio::test]
    async fn unconfigured_program_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = CommandReporter::evaluator(CommandConfig::default(), dir.path());
        reporter.evaluate(&spec("rmcat1")).await.unwrap();
        assert!(!dir.path().join(SPEC_FILE).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandConfig {
            program: Some("false".into()),
            args: vec![],
        };
        let reporter = CommandReporter::plotter(command, dir.path());
        let err = reporter.plot(&spec("rmcat1")).await.unwrap_err();
        assert!(err.to_string().contains("plotter false"));
        assert!(dir.path().join(SPEC_FILE).exists());
    }
}
