// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmq bench` command - Push sequence numbers through a queue.
//!
//! Producer and consumer each get their own `MessageQueue<u64>` mapping of
//! the segment and run on blocking threads, polling the queue until every
//! message has gone through. The consumer checks ordering.

use std::time::Instant;

use shmq_core::{ConfigLoader, MessageQueue};
use thiserror::Error;

/// Failures specific to the throughput check.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Bench transfers u64 values; quantum_size must be 8, got {0}")]
    QuantumSize(usize),

    #[error("Out of order: expected {expected}, received {received}")]
    OutOfOrder { expected: u64, received: u64 },

    #[error("{side} task failed: {reason}")]
    Task { side: &'static str, reason: String },
}

pub async fn execute(
    config_path: &str,
    messages: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let total = messages.unwrap_or(config.bench.messages);
    let batch = config.bench.batch;

    if config.queue.quantum_size != std::mem::size_of::<u64>() {
        return Err(BenchError::QuantumSize(config.queue.quantum_size).into());
    }

    let segment = config.queue.create_segment()?;
    tracing::info!(
        name = %segment.name(),
        quantum_count = config.queue.quantum_count,
        messages = total,
        batch = batch,
        "Starting bench"
    );

    // Open both sides up front so neither task can be left polling alone.
    let producer_queue = MessageQueue::<u64>::try_new(segment.descriptor())?;
    let consumer_queue = MessageQueue::<u64>::try_new(segment.descriptor())?;
    let started = Instant::now();

    let producer = tokio::task::spawn_blocking(move || produce(producer_queue, total, batch));
    let consumer = tokio::task::spawn_blocking(move || consume(consumer_queue, total, batch));

    let producer_spins = producer.await.map_err(|e| BenchError::Task {
        side: "producer",
        reason: e.to_string(),
    })?;
    let consumer_spins = consumer.await.map_err(|e| BenchError::Task {
        side: "consumer",
        reason: e.to_string(),
    })??;

    let elapsed = started.elapsed();
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);

    println!("✓ {} messages delivered in order", total);
    println!("  Elapsed:         {:.3}s", secs);
    println!("  Throughput:      {:.0} msg/s", total as f64 / secs);
    println!(
        "  Bandwidth:       {:.1} MiB/s",
        (total * 8) as f64 / secs / (1024.0 * 1024.0)
    );
    println!("  Producer full:   {} polls", producer_spins);
    println!("  Consumer empty:  {} polls", consumer_spins);
    println!(
        "  Final counters:  read={} write={}",
        segment.read_counter_value()?,
        segment.write_counter_value()?
    );

    Ok(())
}

/// Write `0..total` in batches. Returns how often the ring was full.
fn produce(mut queue: MessageQueue<u64>, total: u64, batch: usize) -> u64 {
    let mut buf = Vec::with_capacity(batch);
    let mut next = 0u64;
    let mut full = 0u64;

    while next < total {
        let n = (batch as u64).min(total - next);
        buf.clear();
        buf.extend(next..next + n);
        if queue.write(&buf) {
            next += n;
        } else {
            full += 1;
            std::hint::spin_loop();
        }
    }

    tracing::debug!(full_polls = full, "Producer finished");
    full
}

/// Read `total` values, checking they arrive as `0..total`.
fn consume(mut queue: MessageQueue<u64>, total: u64, batch: usize) -> Result<u64, BenchError> {
    let mut buf = vec![0u64; batch];
    let mut expected = 0u64;
    let mut empty = 0u64;

    while expected < total {
        let n = (batch as u64).min(total - expected) as usize;
        if !queue.read(&mut buf[..n]) {
            empty += 1;
            std::hint::spin_loop();
            continue;
        }
        for &received in &buf[..n] {
            if received != expected {
                return Err(BenchError::OutOfOrder { expected, received });
            }
            expected += 1;
        }
    }

    tracing::debug!(empty_polls = empty, "Consumer finished");
    Ok(empty)
}
