// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! MappedRegion - maps one grantor into this process.
//!
//! mmap offsets must be page aligned but grantor offsets need not be, so the
//! mapping starts at the enclosing page boundary and the returned pointer is
//! moved forward to where the grantor actually begins.

use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::error::SharedMemoryError;
use crate::shm::descriptor::{Grantor, NativeHandle};

/// System page size, queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    })
}

/// Page-aligned mapping window for a grantor: `(aligned_offset, length)`.
pub fn mapping_window(grantor: &Grantor, page: usize) -> (usize, usize) {
    let aligned = (grantor.offset / page) * page;
    (aligned, grantor.offset - aligned + grantor.extent)
}

/// A shared, read-write mapping of one grantor.
///
/// Owns the mapping and unmaps exactly what it mapped on drop. The backing
/// object itself is left alone.
pub struct MappedRegion {
    /// Page-aligned start of the mapping.
    base: NonNull<u8>,
    /// Length of the whole mapping, including the leading alignment slack.
    map_len: usize,
    /// Distance from `base` to the grantor's first byte.
    lead: usize,
    /// Usable length (the grantor's extent).
    extent: usize,
}

// SAFETY: the region owns its mapping; moving it to another thread moves that ownership.
unsafe impl Send for MappedRegion {}

impl MappedRegion {
    /// Map `grantor` from the backing object it names in `handle`.
    pub fn map(handle: &NativeHandle, grantor: &Grantor) -> Result<Self, SharedMemoryError> {
        let fd = handle
            .fd(grantor.fd_index)
            .ok_or_else(|| SharedMemoryError::MapFailed {
                reason: format!("fd index {} not in handle", grantor.fd_index),
            })?;

        let (aligned, map_len) = mapping_window(grantor, page_size());
        if map_len == 0 {
            return Err(SharedMemoryError::MapFailed {
                reason: "zero-length grantor".to_string(),
            });
        }

        // SAFETY: fd comes from a validated handle, length is non-zero and the
        // offset is page aligned. MAP_SHARED makes writes visible to every mapper.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                aligned as libc::off_t,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(SharedMemoryError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }

        let base = NonNull::new(ptr as *mut u8).ok_or_else(|| SharedMemoryError::MapFailed {
            reason: "mmap returned null".to_string(),
        })?;

        tracing::debug!(
            fd = fd,
            offset = grantor.offset,
            extent = grantor.extent,
            map_offset = aligned,
            map_len = map_len,
            "Mapped grantor"
        );

        Ok(Self {
            base,
            map_len,
            lead: grantor.offset - aligned,
            extent: grantor.extent,
        })
    }

    /// Pointer to the first byte of the grantor.
    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: lead < map_len, so the result stays inside the mapping
        unsafe { self.base.as_ptr().add(self.lead) }
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.extent
    }

    pub fn is_empty(&self) -> bool {
        self.extent == 0
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: base and map_len are exactly what mmap returned and was given
        let result = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.map_len) };
        if result < 0 {
            tracing::error!(
                map_len = self.map_len,
                error = %std::io::Error::last_os_error(),
                "Failed to unmap grantor"
            );
        } else {
            tracing::debug!(map_len = self.map_len, "Unmapped grantor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_window_aligned() {
        let grantor = Grantor::new(0, 8192, 100);
        assert_eq!(mapping_window(&grantor, 4096), (8192, 100));
    }

    #[test]
    fn test_mapping_window_unaligned() {
        let grantor = Grantor::new(0, 4096 + 128, 64);
        assert_eq!(mapping_window(&grantor, 4096), (4096, 192));

        let grantor = Grantor::new(0, 64, 8);
        assert_eq!(mapping_window(&grantor, 4096), (0, 72));
    }

    #[test]
    fn test_page_size_sane() {
        let page = page_size();
        assert!(page >= 4096);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn test_map_bad_fd_fails() {
        let handle = NativeHandle::new(vec![-1]);
        let result = MappedRegion::map(&handle, &Grantor::new(0, 0, 8));
        assert!(matches!(result, Err(SharedMemoryError::MapFailed { .. })));
    }

    #[test]
    fn test_map_missing_fd_index_fails() {
        let handle = NativeHandle::new(vec![]);
        let result = MappedRegion::map(&handle, &Grantor::new(0, 0, 8));
        assert!(result.is_err());
    }
}
