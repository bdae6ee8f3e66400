//! # Scenario Registry
//!
//! Closed lookup table from [`ScenarioKey`] to the entry that knows how to
//! construct its [`TestSpec`]. Each entry declares which parameters it
//! consumes through its [`Inputs`]; fields a scenario does not consume are
//! left unset on the resulting spec.
//!
//! Adding a scenario means adding one [`ScenarioEntry`]; call sites only
//! ever go through [`ScenarioRegistry::build`].

use std::collections::HashMap;
use std::time::Duration;

use crate::scenario::{Extras, ScenarioError, ScenarioKey, ScenarioParams, TestSpec};

/// A single run parameter a scenario may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Algorithm,
    Latency,
    Jitter,
    Source,
    Sink,
    Subflows,
    Tcp,
}

/// Parameter set declared by a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inputs {
    /// algorithm, latency, jitter, source, sink.
    Single,
    /// `Single` plus the subflow count.
    Multipath,
    /// `Multipath` plus the competing-TCP flag.
    MultipathTcp,
}

impl Inputs {
    pub fn consumes(&self) -> &'static [Param] {
        const SINGLE: &[Param] = &[
            Param::Algorithm,
            Param::Latency,
            Param::Jitter,
            Param::Source,
            Param::Sink,
        ];
        const MULTIPATH: &[Param] = &[
            Param::Algorithm,
            Param::Latency,
            Param::Jitter,
            Param::Source,
            Param::Sink,
            Param::Subflows,
        ];
        const MULTIPATH_TCP: &[Param] = &[
            Param::Algorithm,
            Param::Latency,
            Param::Jitter,
            Param::Source,
            Param::Sink,
            Param::Subflows,
            Param::Tcp,
        ];
        match self {
            Inputs::Single => SINGLE,
            Inputs::Multipath => MULTIPATH,
            Inputs::MultipathTcp => MULTIPATH_TCP,
        }
    }
}

/// Constructor for one scenario key.
#[derive(Debug, Clone)]
pub struct ScenarioEntry {
    pub key: ScenarioKey,
    pub inputs: Inputs,
    pub base_duration: Duration,
    pub summary: &'static str,
}

impl ScenarioEntry {
    pub const fn new(
        key: ScenarioKey,
        inputs: Inputs,
        base_secs: u64,
        summary: &'static str,
    ) -> Self {
        ScenarioEntry {
            key,
            inputs,
            base_duration: Duration::from_secs(base_secs),
            summary,
        }
    }

    /// Build a spec from `params`, reading only the declared inputs.
    pub fn build(&self, params: &ScenarioParams) -> Result<TestSpec, ScenarioError> {
        let latency_ms = *params
            .latencies_ms
            .first()
            .ok_or(ScenarioError::MissingParameter {
                key: self.key,
                param: "latency",
            })?;
        let jitter_ms = *params
            .jitters_ms
            .first()
            .ok_or(ScenarioError::MissingParameter {
                key: self.key,
                param: "jitter",
            })?;

        let mut extras = Extras::default();
        for param in self.inputs.consumes() {
            match param {
                Param::Subflows => {
                    if params.subflows == 0 {
                        return Err(ScenarioError::InvalidParameter {
                            key: self.key,
                            param: "subflows",
                            reason: "at least one subflow is required".into(),
                        });
                    }
                    extras.subflows = Some(params.subflows);
                }
                Param::Tcp => extras.tcp = Some(params.tcp),
                _ => {}
            }
        }

        Ok(TestSpec::new(
            self.key,
            params,
            latency_ms,
            jitter_ms,
            extras,
            self.base_duration,
            self.summary,
        ))
    }
}

const STANDARD_ENTRIES: &[ScenarioEntry] = &[
    ScenarioEntry::new(ScenarioKey::Rmcat1, Inputs::Single, 100, "variable available capacity, single flow"),
    ScenarioEntry::new(ScenarioKey::Rmcat2, Inputs::Single, 125, "variable available capacity, multiple flows"),
    ScenarioEntry::new(ScenarioKey::Rmcat3, Inputs::Single, 100, "congested feedback link, bi-directional media"),
    ScenarioEntry::new(ScenarioKey::Rmcat4, Inputs::Single, 120, "competing media flows, same congestion control"),
    ScenarioEntry::new(ScenarioKey::Rmcat5, Inputs::Single, 300, "round-trip time fairness"),
    ScenarioEntry::new(ScenarioKey::Rmcat6, Inputs::Single, 120, "media flow competing with a long TCP flow"),
    ScenarioEntry::new(ScenarioKey::Rmcat7, Inputs::Single, 300, "media flow competing with short TCP flows"),
    ScenarioEntry::new(ScenarioKey::Mprtp1, Inputs::Multipath, 120, "variable capacity on one subflow"),
    ScenarioEntry::new(ScenarioKey::Mprtp2, Inputs::Multipath, 120, "variable capacity on every subflow"),
    ScenarioEntry::new(ScenarioKey::Mprtp3, Inputs::Multipath, 120, "congested feedback path"),
    ScenarioEntry::new(ScenarioKey::Mprtp4, Inputs::Multipath, 120, "asymmetric subflow capacity"),
    ScenarioEntry::new(ScenarioKey::Mprtp5, Inputs::MultipathTcp, 200, "subflows sharing a bottleneck with TCP"),
    ScenarioEntry::new(ScenarioKey::Mprtp6, Inputs::MultipathTcp, 200, "subflow joins mid-run"),
    ScenarioEntry::new(ScenarioKey::Mprtp7, Inputs::MultipathTcp, 200, "subflow leaves mid-run"),
    ScenarioEntry::new(ScenarioKey::Mprtp8, Inputs::Multipath, 150, "subflow outage and recovery"),
    ScenarioEntry::new(ScenarioKey::Mprtp9, Inputs::Multipath, 150, "shared bottleneck across subflows"),
    ScenarioEntry::new(ScenarioKey::Mprtp10, Inputs::Multipath, 150, "heterogeneous round-trip times"),
    ScenarioEntry::new(ScenarioKey::Mprtp11, Inputs::Multipath, 150, "competing multi-path flows"),
];

/// Lookup table of scenario constructors.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    entries: HashMap<ScenarioKey, ScenarioEntry>,
}

impl ScenarioRegistry {
    /// An empty registry. Every lookup misses until entries are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every predefined scenario.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for entry in STANDARD_ENTRIES {
            registry.register(entry.clone());
        }
        registry
    }

    /// Add or replace the entry for `entry.key`.
    pub fn register(&mut self, entry: ScenarioEntry) {
        self.entries.insert(entry.key, entry);
    }

    pub fn lookup(&self, key: &str) -> Result<&ScenarioEntry, ScenarioError> {
        key.parse::<ScenarioKey>()
            .ok()
            .and_then(|k| self.entries.get(&k))
            .ok_or_else(|| ScenarioError::UnknownScenario(key.to_string()))
    }

    pub fn build(&self, key: &str, params: &ScenarioParams) -> Result<TestSpec, ScenarioError> {
        self.lookup(key)?.build(params)
    }

    /// Registered keys in declaration order.
    pub fn keys(&self) -> Vec<ScenarioKey> {
        let mut keys: Vec<_> = self.entries.keys().copied().collect();
        keys.sort();
        keys
    }
}
