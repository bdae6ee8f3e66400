//! Experiment lifecycle controller for congestion-control trials.
//!
//! This crate contains:
//! - **Lifecycle**: one run from setup through its single stop sequence
//! - **Watchdog**: self-renewing deadline that stops a stalled run
//! - **Cancellation**: first termination request stops gracefully, the
//!   next one exits at once
//! - **Supervisor**: stats relay / packet capture helper processes
//! - **Batch**: repeated and multi-scenario runs with result archiving

pub mod archive;
pub mod batch;
pub mod cancel;
pub mod config;
pub mod driver;
pub mod lifecycle;
pub mod report;
pub mod supervisor;
pub mod watchdog;

pub mod test_util;
