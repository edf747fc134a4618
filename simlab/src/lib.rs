//! SimLab - simulation-based evaluation of conversational agents.
//!
//! Agents and user simulators are paired, talk to each other over HTTP, and
//! the recorded dialogues are scored with pluggable metrics.

pub mod cli;
pub mod connector;
pub mod container;
pub mod dialogue;
pub mod domain;
pub mod error;
pub mod information_need;
pub mod metrics;
pub mod orchestrator;
pub mod participant;
pub mod platform;
pub mod registry;
pub mod run_configuration;
pub mod server;
pub mod settings;
pub mod statistics;
pub mod storage;
pub mod task;
pub mod telemetry;

pub use error::{Result, SimlabError};
pub use information_need::InformationNeed;
pub use orchestrator::Orchestrator;
