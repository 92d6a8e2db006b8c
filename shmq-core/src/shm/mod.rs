// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared Memory IPC module.
//!
//! Lock-free single-producer single-consumer queue of fixed-size elements
//! over shared memory. The queue consumes a `RegionDescriptor`, maps its
//! three grantors, and coordinates both sides through two atomic counters.

mod descriptor;
mod mapper;
mod queue;
mod segment;

pub use descriptor::{Grantor, NativeHandle, RegionDescriptor, COUNTER_SIZE};
pub use mapper::{mapping_window, page_size, MappedRegion};
pub use queue::{MessageQueue, Span, Transaction};
pub use segment::{QueueLayout, QueueSegment};
