// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! QueueSegment - allocates the shared memory a queue lives in.
//!
//! The queue itself only consumes a `RegionDescriptor`. Something has to
//! create the backing object, size it, and zero the counters exactly once
//! before either side starts; this module is that something. It supports an
//! anonymous memfd (share it by passing the fd) and named POSIX shared memory
//! (share it by name).
//!
//! Layout inside the backing object:
//!
//! ```text
//!   0..  8   read counter  (u64, consumer-owned)
//!  64.. 72   write counter (u64, producer-owned)
//! 128.. 128 + quantum_size * quantum_count   data ring
//! ```

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::FileExt;

use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

use crate::error::SharedMemoryError;
use crate::shm::descriptor::{Grantor, NativeHandle, RegionDescriptor, COUNTER_SIZE};

/// Where the queue's three regions sit inside one backing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLayout {
    quantum_size: usize,
    quantum_count: usize,
    ring_bytes: usize,
}

impl QueueLayout {
    pub const READ_COUNTER_OFFSET: usize = 0;
    /// Kept on its own cache line so producer and consumer don't false-share.
    pub const WRITE_COUNTER_OFFSET: usize = 64;
    pub const DATA_OFFSET: usize = 128;

    /// Compute a layout, rejecting empty or overflowing rings.
    pub fn new(quantum_size: usize, quantum_count: usize) -> Result<Self, SharedMemoryError> {
        if quantum_size == 0 || quantum_count == 0 {
            return Err(SharedMemoryError::InvalidLayout {
                reason: format!(
                    "quantum_size ({}) and quantum_count ({}) must be non-zero",
                    quantum_size, quantum_count
                ),
            });
        }

        let ring_bytes = quantum_size
            .checked_mul(quantum_count)
            .filter(|bytes| {
                bytes
                    .checked_add(Self::DATA_OFFSET)
                    .is_some_and(|total| total <= i64::MAX as usize)
            })
            .ok_or_else(|| SharedMemoryError::InvalidLayout {
                reason: format!("ring size overflows: {} x {}", quantum_size, quantum_count),
            })?;

        Ok(Self {
            quantum_size,
            quantum_count,
            ring_bytes,
        })
    }

    pub fn quantum_size(&self) -> usize {
        self.quantum_size
    }

    pub fn quantum_count(&self) -> usize {
        self.quantum_count
    }

    pub fn ring_bytes(&self) -> usize {
        self.ring_bytes
    }

    /// Size of the backing object.
    pub fn total_size(&self) -> usize {
        Self::DATA_OFFSET + self.ring_bytes
    }

    /// Grantors in slot order, all on fd index 0.
    pub fn grantors(&self) -> Vec<Grantor> {
        vec![
            Grantor::new(0, Self::READ_COUNTER_OFFSET, COUNTER_SIZE),
            Grantor::new(0, Self::WRITE_COUNTER_OFFSET, COUNTER_SIZE),
            Grantor::new(0, Self::DATA_OFFSET, self.ring_bytes),
        ]
    }

    /// Descriptor for a backing object laid out this way.
    pub fn descriptor(&self, fd: std::os::fd::RawFd) -> RegionDescriptor {
        RegionDescriptor::new(
            NativeHandle::new(vec![fd]),
            self.grantors(),
            self.quantum_size,
            self.quantum_count,
        )
    }
}

/// A backing object sized for one queue.
///
/// Owns the fd. A creator of named memory unlinks the name on drop; mappings
/// made from this segment's descriptor stay valid after it is dropped.
pub struct QueueSegment {
    /// Name of the object (memfd label or shm name without the leading /).
    name: String,
    file: File,
    layout: QueueLayout,
    /// Whether this is named POSIX shared memory.
    named: bool,
    /// Whether this instance created the named object (and unlinks it).
    is_owner: bool,
}

impl QueueSegment {
    /// Create an anonymous memfd-backed segment with zeroed counters.
    pub fn anonymous(name: &str, layout: QueueLayout) -> Result<Self, SharedMemoryError> {
        let c_name = CString::new(name).map_err(|e| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason: format!("Invalid name: {}", e),
        })?;

        let fd = memfd_create(c_name.as_c_str(), MemFdCreateFlag::MFD_CLOEXEC).map_err(|e| {
            SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason: format!("memfd_create failed: {}", e),
            }
        })?;

        let segment = Self {
            name: name.to_string(),
            file: File::from(fd),
            layout,
            named: false,
            is_owner: true,
        };
        segment.initialize()?;

        tracing::debug!(name = %name, size = layout.total_size(), "Created anonymous queue segment");

        Ok(segment)
    }

    /// Create named POSIX shared memory with zeroed counters.
    ///
    /// Fails if an object with this name already exists.
    pub fn create(name: &str, layout: QueueLayout) -> Result<Self, SharedMemoryError> {
        let c_name = Self::shm_name(name).map_err(|reason| SharedMemoryError::CreateFailed {
            name: name.to_string(),
            reason,
        })?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR | libc::O_EXCL,
                0o600,
            )
        };

        if fd < 0 {
            let errno = std::io::Error::last_os_error();
            let reason = if errno.raw_os_error() == Some(libc::EEXIST) {
                "Shared memory already exists".to_string()
            } else {
                format!("shm_open failed: {}", errno)
            };
            return Err(SharedMemoryError::CreateFailed {
                name: name.to_string(),
                reason,
            });
        }

        // From here on drop closes the fd and unlinks the name on any failure.
        let segment = Self {
            name: name.to_string(),
            // SAFETY: shm_open returned a fresh fd that nothing else owns
            file: File::from(unsafe { OwnedFd::from_raw_fd(fd) }),
            layout,
            named: true,
            is_owner: true,
        };
        segment.initialize()?;

        tracing::debug!(name = %name, size = layout.total_size(), "Created named queue segment");

        Ok(segment)
    }

    /// Open named shared memory created elsewhere. Counters are left as they are.
    pub fn open(name: &str, layout: QueueLayout) -> Result<Self, SharedMemoryError> {
        let c_name = Self::shm_name(name).map_err(|reason| SharedMemoryError::OpenFailed {
            name: name.to_string(),
            reason,
        })?;

        // SAFETY: c_name is a valid CString
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }

        let segment = Self {
            name: name.to_string(),
            // SAFETY: shm_open returned a fresh fd that nothing else owns
            file: File::from(unsafe { OwnedFd::from_raw_fd(fd) }),
            layout,
            named: true,
            is_owner: false,
        };

        let actual = segment
            .file
            .metadata()
            .map_err(|e| SharedMemoryError::OpenFailed {
                name: name.to_string(),
                reason: format!("fstat failed: {}", e),
            })?
            .len();
        if actual < layout.total_size() as u64 {
            return Err(SharedMemoryError::InvalidLayout {
                reason: format!(
                    "segment {} is {} bytes, layout needs {}",
                    name,
                    actual,
                    layout.total_size()
                ),
            });
        }

        tracing::debug!(name = %name, size = actual, "Opened named queue segment");

        Ok(segment)
    }

    fn shm_name(name: &str) -> Result<CString, String> {
        if name.is_empty() {
            return Err("Name cannot be empty".to_string());
        }
        if name.contains('/') {
            return Err("Name cannot contain '/'".to_string());
        }
        CString::new(format!("/{}", name)).map_err(|e| format!("Invalid name: {}", e))
    }

    /// Size the object and zero the counters.
    fn initialize(&self) -> Result<(), SharedMemoryError> {
        self.file
            .set_len(self.layout.total_size() as u64)
            .map_err(|e| SharedMemoryError::CreateFailed {
                name: self.name.clone(),
                reason: format!("ftruncate failed: {}", e),
            })?;
        self.reset_counters()
    }

    /// Zero both counters.
    ///
    /// This is the one-time setup step of the queue protocol: run it on the
    /// creating side before any queue is built on this segment, never while
    /// a producer or consumer is active.
    pub fn reset_counters(&self) -> Result<(), SharedMemoryError> {
        for offset in [
            QueueLayout::READ_COUNTER_OFFSET,
            QueueLayout::WRITE_COUNTER_OFFSET,
        ] {
            self.file
                .write_all_at(&0u64.to_ne_bytes(), offset as u64)
                .map_err(|e| SharedMemoryError::CounterAccess {
                    reason: format!("zeroing counter at {}: {}", offset, e),
                })?;
        }
        Ok(())
    }

    fn counter_at(&self, offset: usize) -> Result<u64, SharedMemoryError> {
        let mut buf = [0u8; COUNTER_SIZE];
        self.file
            .read_exact_at(&mut buf, offset as u64)
            .map_err(|e| SharedMemoryError::CounterAccess {
                reason: format!("reading counter at {}: {}", offset, e),
            })?;
        Ok(u64::from_ne_bytes(buf))
    }

    /// Current read counter, read through the fd.
    pub fn read_counter_value(&self) -> Result<u64, SharedMemoryError> {
        self.counter_at(QueueLayout::READ_COUNTER_OFFSET)
    }

    /// Current write counter, read through the fd.
    pub fn write_counter_value(&self) -> Result<u64, SharedMemoryError> {
        self.counter_at(QueueLayout::WRITE_COUNTER_OFFSET)
    }

    /// Descriptor both sides hand to `MessageQueue`.
    pub fn descriptor(&self) -> RegionDescriptor {
        self.layout.descriptor(self.file.as_raw_fd())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> QueueLayout {
        self.layout
    }

    pub fn is_named(&self) -> bool {
        self.named
    }
}

impl Drop for QueueSegment {
    fn drop(&mut self) {
        // The fd closes with `file`; only a named creator has more to do.
        if self.named && self.is_owner {
            if let Ok(c_name) = Self::shm_name(&self.name) {
                // SAFETY: c_name is a valid CString
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                tracing::debug!(name = %self.name, "Unlinked queue segment");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_geometry() {
        let layout = QueueLayout::new(4, 16).unwrap();
        assert_eq!(layout.ring_bytes(), 64);
        assert_eq!(layout.total_size(), 192);

        let grantors = layout.grantors();
        assert_eq!(grantors.len(), RegionDescriptor::MIN_GRANTOR_COUNT);
        assert_eq!(grantors[RegionDescriptor::DATA], Grantor::new(0, 128, 64));
        assert!(layout.descriptor(7).validate(4).is_ok());
    }

    #[test]
    fn test_layout_rejects_bad_sizes() {
        assert!(QueueLayout::new(0, 16).is_err());
        assert!(QueueLayout::new(4, 0).is_err());
        assert!(QueueLayout::new(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_anonymous_segment_counters_start_at_zero() {
        let layout = QueueLayout::new(8, 32).unwrap();
        let segment = QueueSegment::anonymous("segment-unit", layout).unwrap();
        assert!(!segment.is_named());
        assert_eq!(segment.read_counter_value().unwrap(), 0);
        assert_eq!(segment.write_counter_value().unwrap(), 0);
        assert_eq!(segment.file.metadata().unwrap().len(), 128 + 256);
    }

    #[test]
    fn test_shm_name_validation() {
        let layout = QueueLayout::new(8, 32).unwrap();
        assert!(QueueSegment::create("", layout).is_err());
        assert!(QueueSegment::create("a/b", layout).is_err());
        assert!(QueueSegment::open("", layout).is_err());
    }
}
