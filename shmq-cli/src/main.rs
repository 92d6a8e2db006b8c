// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmq CLI
//!
//! Command-line interface for inspecting and exercising shmq queues.

use clap::{Parser, Subcommand};

mod commands;

/// shmq - lock-free shared memory message queue
#[derive(Parser)]
#[command(name = "shmq")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "shmq.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Show the segment layout and grantors a configuration produces
    Inspect,

    /// Push sequence numbers through a queue and report throughput
    Bench {
        /// Override the number of messages from the config
        #[arg(short, long)]
        messages: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Inspect => commands::inspect::execute(&cli.config).await,
        Commands::Bench { messages } => commands::bench::execute(&cli.config, messages).await,
    }
}
