// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq validate` command - Validate configuration file.

use shmq_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let layout = config.queue.layout()?;
            println!("✓ Configuration is valid");
            println!();
            println!("Queue Settings:");
            println!("  Name:          {}", config.queue.name);
            println!(
                "  Backing:       {}",
                if config.queue.named {
                    "named POSIX shared memory"
                } else {
                    "anonymous memfd"
                }
            );
            println!("  Quantum Size:  {} bytes", config.queue.quantum_size);
            println!("  Quantum Count: {}", config.queue.quantum_count);
            println!("  Ring Size:     {} bytes", layout.ring_bytes());
            println!();
            println!("Bench Settings:");
            println!("  Messages:      {}", config.bench.messages);
            println!("  Batch:         {}", config.bench.batch);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
