//! deploy-runner: a per-job deployment runner.
//!
//! Given one job's configuration, reconciles the live state of containers,
//! named volumes, and networks on a container engine so they match the
//! declarative manifest, publishes the produced resources and connections to
//! the control-plane agent, then exits. One process, one action.

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod platform;

pub use config::Configuration;
pub use error::{Result, RunnerError};
