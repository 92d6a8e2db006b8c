// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Region descriptor - the shared memory layout handed to a queue.
//!
//! A descriptor is produced by whoever allocated the shared memory and is
//! passed (out-of-band) to both sides of the queue. It names the backing
//! objects and, through its grantors, where the read counter, write counter
//! and data ring live inside them.

use std::os::fd::RawFd;

use crate::error::DescriptorError;

/// Size of one shared counter in bytes.
pub const COUNTER_SIZE: usize = std::mem::size_of::<u64>();

/// One mappable slice of a backing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grantor {
    /// Index into the descriptor's handle set.
    pub fd_index: usize,
    /// Byte offset into the backing object.
    pub offset: usize,
    /// Length in bytes.
    pub extent: usize,
}

impl Grantor {
    pub fn new(fd_index: usize, offset: usize, extent: usize) -> Self {
        Self {
            fd_index,
            offset,
            extent,
        }
    }
}

/// Opaque set of backing object handles.
///
/// The descriptor only borrows these: closing them is the allocator's job,
/// and mappings stay valid after the fds are closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHandle {
    fds: Vec<RawFd>,
}

impl NativeHandle {
    pub fn new(fds: Vec<RawFd>) -> Self {
        Self { fds }
    }

    pub fn fds(&self) -> &[RawFd] {
        &self.fds
    }

    pub fn fd(&self, index: usize) -> Option<RawFd> {
        self.fds.get(index).copied()
    }

    /// A handle is well formed when it has at least one fd and none are negative.
    pub fn is_valid(&self) -> bool {
        !self.fds.is_empty() && self.fds.iter().all(|&fd| fd >= 0)
    }
}

/// Description of a queue's shared memory.
///
/// Quantum size and count are fixed at construction and never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescriptor {
    handle: NativeHandle,
    grantors: Vec<Grantor>,
    quantum_size: usize,
    quantum_count: usize,
}

impl RegionDescriptor {
    /// Grantor slot holding the consumer's read counter.
    pub const READ_COUNTER: usize = 0;
    /// Grantor slot holding the producer's write counter.
    pub const WRITE_COUNTER: usize = 1;
    /// Grantor slot holding the data ring.
    pub const DATA: usize = 2;
    /// Minimum number of grantors a usable descriptor carries.
    pub const MIN_GRANTOR_COUNT: usize = 3;

    pub fn new(
        handle: NativeHandle,
        grantors: Vec<Grantor>,
        quantum_size: usize,
        quantum_count: usize,
    ) -> Self {
        Self {
            handle,
            grantors,
            quantum_size,
            quantum_count,
        }
    }

    pub fn handle(&self) -> &NativeHandle {
        &self.handle
    }

    pub fn is_handle_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn grantors(&self) -> &[Grantor] {
        &self.grantors
    }

    pub fn grantor(&self, slot: usize) -> Option<&Grantor> {
        self.grantors.get(slot)
    }

    pub fn count_grantors(&self) -> usize {
        self.grantors.len()
    }

    pub fn quantum_size(&self) -> usize {
        self.quantum_size
    }

    pub fn quantum_count(&self) -> usize {
        self.quantum_count
    }

    /// Total ring capacity in bytes, or `None` if it overflows.
    pub fn ring_bytes(&self) -> Option<usize> {
        self.quantum_size.checked_mul(self.quantum_count)
    }

    /// Check the descriptor against the element size the caller will transfer.
    ///
    /// Succeeds only when every grantor can be mapped and the three required
    /// slots are large enough for their roles.
    pub fn validate(&self, expected_quantum_size: usize) -> Result<(), DescriptorError> {
        if !self.handle.is_valid() {
            return Err(DescriptorError::InvalidHandle {
                reason: if self.handle.fds.is_empty() {
                    "no file descriptors".to_string()
                } else {
                    format!("negative file descriptor in {:?}", self.handle.fds)
                },
            });
        }

        if self.grantors.len() < Self::MIN_GRANTOR_COUNT {
            return Err(DescriptorError::TooFewGrantors {
                count: self.grantors.len(),
                min: Self::MIN_GRANTOR_COUNT,
            });
        }

        if self.quantum_size != expected_quantum_size {
            return Err(DescriptorError::QuantumSizeMismatch {
                expected: expected_quantum_size,
                actual: self.quantum_size,
            });
        }

        if self.quantum_size == 0 || self.quantum_count == 0 {
            return Err(DescriptorError::EmptyRing {
                quantum_size: self.quantum_size,
                quantum_count: self.quantum_count,
            });
        }

        // Counters are u64 and ring offsets are mmap offsets: both must fit in i64.
        let ring_bytes = self
            .ring_bytes()
            .filter(|&bytes| bytes <= i64::MAX as usize)
            .ok_or(DescriptorError::SizeOverflow {
                quantum_size: self.quantum_size,
                quantum_count: self.quantum_count,
            })?;

        for (slot, grantor) in self.grantors.iter().enumerate() {
            if grantor.fd_index >= self.handle.fds.len() {
                return Err(DescriptorError::FdIndexOutOfRange {
                    slot,
                    fd_index: grantor.fd_index,
                    fd_count: self.handle.fds.len(),
                });
            }
            let end = grantor.offset.checked_add(grantor.extent);
            if end.map_or(true, |end| end > i64::MAX as usize) {
                return Err(DescriptorError::InvalidGrantor {
                    slot,
                    reason: format!(
                        "offset {} + extent {} overflows",
                        grantor.offset, grantor.extent
                    ),
                });
            }
        }

        for slot in [Self::READ_COUNTER, Self::WRITE_COUNTER] {
            let grantor = &self.grantors[slot];
            if grantor.extent < COUNTER_SIZE {
                return Err(DescriptorError::InvalidGrantor {
                    slot,
                    reason: format!(
                        "counter extent {} is smaller than {} bytes",
                        grantor.extent, COUNTER_SIZE
                    ),
                });
            }
            if grantor.offset % std::mem::align_of::<u64>() != 0 {
                return Err(DescriptorError::InvalidGrantor {
                    slot,
                    reason: format!("counter offset {} is not 8-byte aligned", grantor.offset),
                });
            }
        }

        let data = &self.grantors[Self::DATA];
        if data.extent < ring_bytes {
            return Err(DescriptorError::InvalidGrantor {
                slot: Self::DATA,
                reason: format!(
                    "data extent {} is smaller than ring size {}",
                    data.extent, ring_bytes
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard(quantum_size: usize, quantum_count: usize) -> RegionDescriptor {
        RegionDescriptor::new(
            NativeHandle::new(vec![3]),
            vec![
                Grantor::new(0, 0, 8),
                Grantor::new(0, 64, 8),
                Grantor::new(0, 128, quantum_size * quantum_count),
            ],
            quantum_size,
            quantum_count,
        )
    }

    #[test]
    fn test_valid_descriptor() {
        let desc = standard(4, 16);
        assert!(desc.validate(4).is_ok());
        assert_eq!(desc.ring_bytes(), Some(64));
        assert_eq!(desc.count_grantors(), 3);
    }

    #[test]
    fn test_quantum_size_mismatch() {
        let desc = standard(4, 16);
        assert_eq!(
            desc.validate(8),
            Err(DescriptorError::QuantumSizeMismatch {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn test_invalid_handles() {
        let mut desc = standard(4, 16);
        desc.handle = NativeHandle::new(vec![]);
        assert!(matches!(
            desc.validate(4),
            Err(DescriptorError::InvalidHandle { .. })
        ));

        desc.handle = NativeHandle::new(vec![-1]);
        assert!(!desc.is_handle_valid());
        assert!(matches!(
            desc.validate(4),
            Err(DescriptorError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_too_few_grantors() {
        let mut desc = standard(4, 16);
        desc.grantors.truncate(2);
        assert_eq!(
            desc.validate(4),
            Err(DescriptorError::TooFewGrantors { count: 2, min: 3 })
        );
    }

    #[test]
    fn test_size_overflow_rejected() {
        let desc = RegionDescriptor::new(
            NativeHandle::new(vec![3]),
            vec![
                Grantor::new(0, 0, 8),
                Grantor::new(0, 64, 8),
                Grantor::new(0, 128, usize::MAX - 128),
            ],
            8,
            usize::MAX / 2,
        );
        assert!(matches!(
            desc.validate(8),
            Err(DescriptorError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_empty_ring_rejected() {
        let desc = standard(4, 0);
        assert!(matches!(
            desc.validate(4),
            Err(DescriptorError::EmptyRing { .. })
        ));
    }

    #[test]
    fn test_fd_index_out_of_range() {
        let mut desc = standard(4, 16);
        desc.grantors[1].fd_index = 1;
        assert_eq!(
            desc.validate(4),
            Err(DescriptorError::FdIndexOutOfRange {
                slot: 1,
                fd_index: 1,
                fd_count: 1
            })
        );
    }

    #[test]
    fn test_misaligned_counter() {
        let mut desc = standard(4, 16);
        desc.grantors[RegionDescriptor::WRITE_COUNTER].offset = 66;
        assert!(matches!(
            desc.validate(4),
            Err(DescriptorError::InvalidGrantor { slot: 1, .. })
        ));
    }

    #[test]
    fn test_short_data_grantor() {
        let mut desc = standard(4, 16);
        desc.grantors[RegionDescriptor::DATA].extent = 63;
        assert!(matches!(
            desc.validate(4),
            Err(DescriptorError::InvalidGrantor { slot: 2, .. })
        ));
    }
}
