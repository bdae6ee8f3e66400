use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("unknown algorithm: {0} (expected FRACTaL or SCReAM)")]
    UnknownAlgorithm(String),
    #[error("scenario {key} requires parameter `{param}`")]
    MissingParameter { key: ScenarioKey, param: &'static str },
    #[error("scenario {key}: invalid `{param}`: {reason}")]
    InvalidParameter {
        key: ScenarioKey,
        param: &'static str,
        reason: String,
    },
}

// ── Algorithm ───────────────────────────────────────────────────────

/// Congestion-control algorithm under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Algorithm {
    #[serde(rename = "FRACTaL")]
    Fractal,
    #[serde(rename = "SCReAM")]
    Scream,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Fractal => "FRACTaL",
            Algorithm::Scream => "SCReAM",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FRACTaL" => Ok(Algorithm::Fractal),
            "SCReAM" => Ok(Algorithm::Scream),
            other => Err(ScenarioError::UnknownAlgorithm(other.to_string())),
        }
    }
}

// ── Scenario keys ───────────────────────────────────────────────────

/// Topology family a scenario key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Single-path RMCAT test cases.
    Rmcat,
    /// Multi-path tests over several subflows.
    Mprtp,
}

/// Identifier of one predefined test topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKey {
    Rmcat1,
    Rmcat2,
    Rmcat3,
    Rmcat4,
    Rmcat5,
    Rmcat6,
    Rmcat7,
    Mprtp1,
    Mprtp2,
    Mprtp3,
    Mprtp4,
    Mprtp5,
    Mprtp6,
    Mprtp7,
    Mprtp8,
    Mprtp9,
    Mprtp10,
    Mprtp11,
}

impl ScenarioKey {
    pub const ALL: [ScenarioKey; 18] = [
        ScenarioKey::Rmcat1,
        ScenarioKey::Rmcat2,
        ScenarioKey::Rmcat3,
        ScenarioKey::Rmcat4,
        ScenarioKey::Rmcat5,
        ScenarioKey::Rmcat6,
        ScenarioKey::Rmcat7,
        ScenarioKey::Mprtp1,
        ScenarioKey::Mprtp2,
        ScenarioKey::Mprtp3,
        ScenarioKey::Mprtp4,
        ScenarioKey::Mprtp5,
        ScenarioKey::Mprtp6,
        ScenarioKey::Mprtp7,
        ScenarioKey::Mprtp8,
        ScenarioKey::Mprtp9,
        ScenarioKey::Mprtp10,
        ScenarioKey::Mprtp11,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKey::Rmcat1 => "rmcat1",
            ScenarioKey::Rmcat2 => "rmcat2",
            ScenarioKey::Rmcat3 => "rmcat3",
            ScenarioKey::Rmcat4 => "rmcat4",
            ScenarioKey::Rmcat5 => "rmcat5",
            ScenarioKey::Rmcat6 => "rmcat6",
            ScenarioKey::Rmcat7 => "rmcat7",
            ScenarioKey::Mprtp1 => "mprtp1",
            ScenarioKey::Mprtp2 => "mprtp2",
            ScenarioKey::Mprtp3 => "mprtp3",
            ScenarioKey::Mprtp4 => "mprtp4",
            ScenarioKey::Mprtp5 => "mprtp5",
            ScenarioKey::Mprtp6 => "mprtp6",
            ScenarioKey::Mprtp7 => "mprtp7",
            ScenarioKey::Mprtp8 => "mprtp8",
            ScenarioKey::Mprtp9 => "mprtp9",
            ScenarioKey::Mprtp10 => "mprtp10",
            ScenarioKey::Mprtp11 => "mprtp11",
        }
    }

    pub fn family(&self) -> Family {
        if self.as_str().starts_with("rmcat") {
            Family::Rmcat
        } else {
            Family::Mprtp
        }
    }
}

impl fmt::Display for ScenarioKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKey {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ScenarioError::UnknownScenario(s.to_string()))
    }
}

// ── Parameters ──────────────────────────────────────────────────────

/// Raw run parameters as supplied by the operator.
///
/// Latency and jitter are lists because a batch may name several values;
/// a single test is configured from the first entry of each.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub algorithm: Algorithm,
    pub latencies_ms: Vec<u32>,
    pub jitters_ms: Vec<u32>,
    pub source: String,
    pub sink: String,
    pub subflows: u32,
    pub tcp: bool,
}

/// Delay characteristics of one emulated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathProfile {
    pub latency_ms: u32,
    pub jitter_ms: u32,
}

impl PathProfile {
    /// Worst-case one-way delay on this path.
    pub fn worst_case_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.latency_ms) + u64::from(self.jitter_ms))
    }
}

// ── TestSpec ────────────────────────────────────────────────────────

/// Fully parameterized, immutable description of one test run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSpec {
    key: ScenarioKey,
    family: Family,
    algorithm: Algorithm,
    latency_ms: u32,
    jitter_ms: u32,
    source: String,
    sink: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    subflows: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tcp: Option<bool>,
    #[serde(rename = "duration_secs", serialize_with = "duration_as_secs")]
    base_duration: Duration,
    description: String,
}

fn duration_as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

/// Family-specific fields of a [`TestSpec`]; `None` where the scenario
/// does not consume the parameter.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Extras {
    pub subflows: Option<u32>,
    pub tcp: Option<bool>,
}

impl TestSpec {
    pub(crate) fn new(
        key: ScenarioKey,
        params: &ScenarioParams,
        latency_ms: u32,
        jitter_ms: u32,
        extras: Extras,
        base_duration: Duration,
        summary: &str,
    ) -> Self {
        let description = describe(key, params.algorithm, latency_ms, jitter_ms, extras, summary);
        TestSpec {
            key,
            family: key.family(),
            algorithm: params.algorithm,
            latency_ms,
            jitter_ms,
            source: params.source.clone(),
            sink: params.sink.clone(),
            subflows: extras.subflows,
            tcp: extras.tcp,
            base_duration,
            description,
        }
    }

    pub fn key(&self) -> ScenarioKey {
        self.key
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }

    pub fn jitter_ms(&self) -> u32 {
        self.jitter_ms
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    /// Number of parallel subflows. Only set for the multi-path family.
    pub fn subflows(&self) -> Option<u32> {
        self.subflows
    }

    /// Whether a competing TCP flow is added. Only set for the variants
    /// that take the transport flag.
    pub fn tcp(&self) -> Option<bool> {
        self.tcp
    }

    /// Intrinsic run length of the scenario, before propagation and drain
    /// margins are added.
    pub fn base_duration(&self) -> Duration {
        self.base_duration
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Delay profile shared by every emulated path.
    pub fn path(&self) -> PathProfile {
        PathProfile {
            latency_ms: self.latency_ms,
            jitter_ms: self.jitter_ms,
        }
    }

    /// Number of emulated paths: one for single-path scenarios, `subflows`
    /// otherwise.
    pub fn path_count(&self) -> u32 {
        self.subflows.unwrap_or(1)
    }
}

fn describe(
    key: ScenarioKey,
    algorithm: Algorithm,
    latency_ms: u32,
    jitter_ms: u32,
    extras: Extras,
    summary: &str,
) -> String {
    let mut out = format!("{key} ({summary}): {algorithm}, latency {latency_ms}ms, jitter {jitter_ms}ms");
    if let Some(n) = extras.subflows {
        out.push_str(&format!(", {n} subflows"));
    }
    if let Some(tcp) = extras.tcp {
        out.push_str(if tcp { ", with TCP" } else { ", without TCP" });
    }
    out
}
