// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for shmq.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Note that running out of ring space or data is *not* an error: `read` and
//! `write` report it as `false` and leave the queue untouched.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for shmq.
#[derive(Debug, Error)]
pub enum QueueError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Construction-fatal Errors - the queue instance is unusable
    // =========================================================================
    #[error("Invalid region descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Shared memory error: {0}")]
    SharedMemory(#[from] SharedMemoryError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors for configuration values.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Reasons a region descriptor is rejected before any mapping happens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Backing handle set is malformed: {reason}")]
    InvalidHandle { reason: String },

    #[error("Too few grantors: {count} (minimum {min})")]
    TooFewGrantors { count: usize, min: usize },

    #[error("Quantum size mismatch: descriptor has {actual} bytes, element type is {expected} bytes")]
    QuantumSizeMismatch { expected: usize, actual: usize },

    #[error("Ring geometry is empty: quantum_size={quantum_size}, quantum_count={quantum_count}")]
    EmptyRing {
        quantum_size: usize,
        quantum_count: usize,
    },

    #[error("Ring size overflows: {quantum_size} x {quantum_count}")]
    SizeOverflow {
        quantum_size: usize,
        quantum_count: usize,
    },

    #[error("Grantor {slot} references fd index {fd_index}, handle has {fd_count} fds")]
    FdIndexOutOfRange {
        slot: usize,
        fd_index: usize,
        fd_count: usize,
    },

    #[error("Grantor {slot} is malformed: {reason}")]
    InvalidGrantor { slot: usize, reason: String },
}

/// Shared memory errors.
#[derive(Debug, Error)]
pub enum SharedMemoryError {
    #[error("Failed to create shared memory region: {name} - {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Failed to open shared memory region: {name} - {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("Failed to map shared memory: {reason}")]
    MapFailed { reason: String },

    #[error("Invalid queue layout: {reason}")]
    InvalidLayout { reason: String },

    #[error("Counter access failed: {reason}")]
    CounterAccess { reason: String },
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
