// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq inspect` command - Print the segment layout for a configuration.

use shmq_core::shm::{mapping_window, page_size};
use shmq_core::{ConfigLoader, RegionDescriptor};

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let layout = config.queue.layout()?;
    let page = page_size();

    println!("Segment '{}'", config.queue.name);
    println!("  Total size: {} bytes", layout.total_size());
    println!("  Page size:  {} bytes", page);
    println!();
    println!("  slot  role           offset    extent    map offset  map length");

    let roles = [
        (RegionDescriptor::READ_COUNTER, "read counter"),
        (RegionDescriptor::WRITE_COUNTER, "write counter"),
        (RegionDescriptor::DATA, "data ring"),
    ];
    let grantors = layout.grantors();
    for (slot, role) in roles {
        let grantor = grantors[slot];
        let (map_offset, map_len) = mapping_window(&grantor, page);
        println!(
            "  {:<4}  {:<13}  {:>8}  {:>8}  {:>10}  {:>10}",
            slot, role, grantor.offset, grantor.extent, map_offset, map_len
        );
    }

    Ok(())
}
