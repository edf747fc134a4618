//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Simulation-based evaluation of conversational agents
#[derive(Parser)]
#[command(name = "simlab-cli")]
#[command(about = "Pairs agents with user simulators, records their dialogues and scores them")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a simulation from a run configuration file
    Run {
        /// Path to the run configuration (.json or .toml)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Serve a reference participant over HTTP
    Serve {
        /// Participant to serve
        #[arg(long, value_enum, default_value_t = ServeRole::Agent)]
        role: ServeRole,
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1:7000")]
        addr: SocketAddr,
    },
    /// Store a batch of information needs and print its id
    ImportBatch {
        /// JSON file holding an array of information needs
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServeRole {
    Agent,
    UserSimulator,
}
