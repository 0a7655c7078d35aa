//! Per-service coordination: one device, its channels and their shutdown

pub mod runner;

pub use runner::{RunnerOptions, ServiceRunner};
