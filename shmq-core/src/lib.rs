//! shmq Core Library
//!
//! Lock-free single-producer single-consumer message queue over shared
//! memory. Provides the region descriptor, the region mapper, the ring
//! engine, segment allocation, and configuration parsing.

pub mod config;
pub mod error;
pub mod shm;

// Re-export commonly used types
pub use config::{BenchConfig, Config, ConfigLoader, QueueConfig};
pub use error::{
    DescriptorError, HardValidationError, QueueError, QueueResult, SharedMemoryError,
};
pub use shm::{Grantor, MessageQueue, NativeHandle, QueueLayout, QueueSegment, RegionDescriptor};
