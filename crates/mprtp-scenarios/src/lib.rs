//! Typed test scenarios for congestion-control trials.
//!
//! Provides the closed set of scenario keys (the single-path `rmcat` family
//! and the multi-path `mprtp` family), the immutable [`TestSpec`] each run is
//! built from, and the [`ScenarioRegistry`] lookup table that maps a key and a
//! parameter bundle to a fully parameterized spec.

pub mod registry;
pub mod scenario;

pub use registry::{Inputs, Param, ScenarioEntry, ScenarioRegistry};
pub use scenario::{
    Algorithm, Family, PathProfile, ScenarioError, ScenarioKey, ScenarioParams, TestSpec,
};
