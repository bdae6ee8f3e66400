//! Archiving of run artifacts.
//!
//! When a batch holds more than one run, each run's artifacts are moved out
//! of the shared results directory into
//! `<archive root>/<scenario>/<algorithm>_<run id>_<run>_<latencies>_<jitters>_<subflows>`.
//! Archiving is best effort: every failed file is logged and skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mprtp_scenarios::{Algorithm, ScenarioKey};
use thiserror::Error;

const RUN_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const RUN_ID_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to list {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of archiving one run.
#[derive(Debug, Default)]
pub struct ArchiveReport {
    pub target: PathBuf,
    pub moved: Vec<PathBuf>,
    pub cleared: usize,
    pub failures: Vec<ArchiveError>,
}

/// Random identifier shared by every run of one invocation.
pub fn run_id() -> String {
    run_id_with(&mut rand::rng())
}

pub fn run_id_with<R: rand::RngExt + ?Sized>(rng: &mut R) -> String {
    (0..RUN_ID_LEN)
        .map(|_| RUN_ID_CHARSET[rng.random_range(0..RUN_ID_CHARSET.len())] as char)
        .collect()
}

/// Archive directory name for one run.
pub fn archive_dir_name(
    algorithm: Algorithm,
    run_id: &str,
    run_index: u32,
    latencies_ms: &[u32],
    jitters_ms: &[u32],
    subflows: u32,
) -> String {
    let millis = |values: &[u32]| {
        values
            .iter()
            .map(|v| format!("{v}ms"))
            .collect::<Vec<_>>()
            .join("_")
    };
    [
        algorithm.to_string(),
        run_id.to_string(),
        run_index.to_string(),
        millis(latencies_ms),
        millis(jitters_ms),
        subflows.to_string(),
    ]
    .join("_")
}

/// Move every regular file in `results_dir` into
/// `archive_root/<key>/<dir_name>`, clearing files left in that directory by
/// an earlier invocation first.
pub fn archive_run(
    results_dir: &Path,
    archive_root: &Path,
    key: ScenarioKey,
    dir_name: &str,
) -> ArchiveReport {
    let target = archive_root.join(key.as_str()).join(dir_name);
    let mut report = ArchiveReport {
        target: target.clone(),
        ..Default::default()
    };

    if target.is_dir() {
        match regular_files(&target) {
            Ok(stale) => {
                for path in stale {
                    match fs::remove_file(&path) {
                        Ok(()) => report.cleared += 1,
                        Err(source) => report.fail(ArchiveError::Remove { path, source }),
                    }
                }
            }
            Err(source) => report.fail(ArchiveError::ReadDir {
                path: target.clone(),
                source,
            }),
        }
    } else if let Err(source) = fs::create_dir_all(&target) {
        report.fail(ArchiveError::CreateDir {
            path: target.clone(),
            source,
        });
        return report;
    }

    let files = match regular_files(results_dir) {
        Ok(files) => files,
        Err(source) => {
            report.fail(ArchiveError::ReadDir {
                path: results_dir.to_path_buf(),
                source,
            });
            return report;
        }
    };

    for from in files {
        let Some(name) = from.file_name() else {
            continue;
        };
        let to = target.join(name);
        match move_file(&from, &to) {
            Ok(()) => {
                tracing::info!(from = %from.display(), to = %target.display(), "archived");
                report.moved.push(to);
            }
            Err(source) => report.fail(ArchiveError::Move { from, to, source }),
        }
    }

    report
}

impl ArchiveReport {
    fn fail(&mut self, err: ArchiveError) {
        tracing::warn!(error = %err, "archive step failed");
        self.failures.push(err);
    }
}

fn regular_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Rename, falling back to copy + remove (e.g. across filesystems).
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}
