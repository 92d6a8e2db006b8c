// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict validation.
//!
//! Describes a queue's geometry and how its backing memory is allocated,
//! plus the parameters of the throughput check. Any invalid field results in
//! a HardValidationError.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HardValidationError, QueueError, QueueResult, SharedMemoryError};
use crate::shm::{QueueLayout, QueueSegment};

/// Largest accepted quantum (one page).
const MAX_QUANTUM_SIZE: usize = 4096;

/// Longest accepted segment name.
const MAX_NAME_LEN: usize = 64;

/// Raw queue section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawQueueConfig {
    #[serde(default = "default_name")]
    name: String,
    quantum_size: Option<usize>,
    quantum_count: Option<usize>,
    #[serde(default)]
    named: bool,
}

fn default_name() -> String {
    "shmq".to_string()
}

/// Raw bench section.
#[derive(Debug, Deserialize)]
struct RawBenchConfig {
    #[serde(default = "default_messages")]
    messages: u64,
    #[serde(default = "default_batch")]
    batch: usize,
}

fn default_messages() -> u64 {
    1_000_000
}

fn default_batch() -> usize {
    16
}

impl Default for RawBenchConfig {
    fn default() -> Self {
        Self {
            messages: default_messages(),
            batch: default_batch(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    queue: RawQueueConfig,
    #[serde(default)]
    bench: RawBenchConfig,
}

/// Validated queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub quantum_size: usize,
    pub quantum_count: usize,
    /// Named POSIX shared memory instead of an anonymous memfd.
    pub named: bool,
}

impl QueueConfig {
    pub fn layout(&self) -> Result<QueueLayout, SharedMemoryError> {
        QueueLayout::new(self.quantum_size, self.quantum_count)
    }

    /// Allocate a fresh segment for this queue (creator side).
    pub fn create_segment(&self) -> Result<QueueSegment, SharedMemoryError> {
        let layout = self.layout()?;
        if self.named {
            QueueSegment::create(&self.name, layout)
        } else {
            QueueSegment::anonymous(&self.name, layout)
        }
    }
}

/// Validated throughput-check configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Elements to push through the queue.
    pub messages: u64,
    /// Elements per read/write call.
    pub batch: usize,
}

/// Complete validated configuration.
#[derive(Debug)]
pub struct Config {
    pub queue: QueueConfig,
    pub bench: BenchConfig,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> QueueResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(QueueError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| QueueError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> QueueResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| QueueError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> QueueResult<Config> {
        let queue = Self::validate_queue(raw.queue)?;
        let bench = Self::validate_bench(raw.bench, &queue)?;
        Ok(Config { queue, bench })
    }

    fn validate_queue(raw: RawQueueConfig) -> QueueResult<QueueConfig> {
        if raw.name.is_empty() || raw.name.len() > MAX_NAME_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue.name",
                value: raw.name,
                reason: format!("Must be 1 to {} characters", MAX_NAME_LEN),
            }
            .into());
        }

        if raw.name.contains('/') || raw.name.contains('\0') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue.name",
                value: raw.name,
                reason: "Must not contain '/' or NUL".to_string(),
            }
            .into());
        }

        let quantum_size =
            raw.quantum_size
                .ok_or_else(|| HardValidationError::MissingRequiredField {
                    field: "quantum_size",
                    context: "queue".to_string(),
                })?;

        let quantum_count =
            raw.quantum_count
                .ok_or_else(|| HardValidationError::MissingRequiredField {
                    field: "quantum_count",
                    context: "queue".to_string(),
                })?;

        if quantum_size == 0 || quantum_size > MAX_QUANTUM_SIZE {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue.quantum_size",
                value: quantum_size.to_string(),
                reason: format!("Must be between 1 and {} bytes", MAX_QUANTUM_SIZE),
            }
            .into());
        }

        if quantum_count == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue.quantum_count",
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            }
            .into());
        }

        if let Err(e) = QueueLayout::new(quantum_size, quantum_count) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "queue.quantum_count",
                value: quantum_count.to_string(),
                reason: e.to_string(),
            }
            .into());
        }

        Ok(QueueConfig {
            name: raw.name,
            quantum_size,
            quantum_count,
            named: raw.named,
        })
    }

    fn validate_bench(raw: RawBenchConfig, queue: &QueueConfig) -> QueueResult<BenchConfig> {
        if raw.messages == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "bench.messages",
                value: "0".to_string(),
                reason: "Must be at least 1".to_string(),
            }
            .into());
        }

        // A batch larger than the ring could never be written.
        if raw.batch == 0 || raw.batch > queue.quantum_count {
            return Err(HardValidationError::InvalidFieldValue {
                field: "bench.batch",
                value: raw.batch.to_string(),
                reason: format!("Must be between 1 and quantum_count ({})", queue.quantum_count),
            }
            .into());
        }

        Ok(BenchConfig {
            messages: raw.messages,
            batch: raw.batch,
        })
    }
}
