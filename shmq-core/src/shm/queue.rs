// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lock-free SPSC message queue over mapped shared memory.
//!
//! Each side of the queue (producer and consumer) builds its own
//! `MessageQueue` from the same `RegionDescriptor`, so both hold private
//! mappings of the same physical pages. Coordination uses two monotonically
//! increasing byte counters:
//!
//! - the write counter, stored only by the producer, published with
//!   `Release` and observed by the consumer with `Acquire`;
//! - the read counter, stored only by the consumer, published with
//!   `Release` and observed by the producer with `Acquire`.
//!
//! A side reads its own counter with `Relaxed` since nobody else writes it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use zerocopy::{AsBytes, FromBytes};

use crate::error::{DescriptorError, QueueError, QueueResult};
use crate::shm::descriptor::RegionDescriptor;
use crate::shm::mapper::MappedRegion;

/// A contiguous run of ring bytes.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    ptr: *mut u8,
    len: usize,
}

impl Span {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The ring bytes a read or write will touch: one span, or two when the
/// request crosses the end of the ring.
#[derive(Debug, Clone, Copy)]
pub struct Transaction {
    first: Span,
    second: Option<Span>,
}

impl Transaction {
    pub fn first(&self) -> Span {
        self.first
    }

    pub fn second(&self) -> Option<Span> {
        self.second
    }

    /// Spans in copy order.
    pub fn spans(&self) -> impl Iterator<Item = Span> {
        std::iter::once(self.first).chain(self.second)
    }

    /// Total bytes covered.
    pub fn len(&self) -> usize {
        self.first.len + self.second.map_or(0, |span| span.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn wraps(&self) -> bool {
        self.second.is_some()
    }
}

/// The three mappings a valid queue holds.
///
/// Fields drop in declaration order; each unmaps itself, so a partially
/// built ring never leaks a mapping.
struct MappedRing {
    read: MappedRegion,
    write: MappedRegion,
    data: MappedRegion,
    ring_bytes: usize,
}

impl MappedRing {
    fn map(desc: &RegionDescriptor) -> QueueResult<Self> {
        let handle = desc.handle();
        let grantor = |slot| {
            desc.grantor(slot)
                .ok_or(QueueError::Descriptor(DescriptorError::TooFewGrantors {
                    count: desc.count_grantors(),
                    min: RegionDescriptor::MIN_GRANTOR_COUNT,
                }))
        };

        let read = MappedRegion::map(handle, grantor(RegionDescriptor::READ_COUNTER)?)?;
        let write = MappedRegion::map(handle, grantor(RegionDescriptor::WRITE_COUNTER)?)?;
        let data = MappedRegion::map(handle, grantor(RegionDescriptor::DATA)?)?;

        debug_assert_eq!(read.as_ptr() as usize % std::mem::align_of::<AtomicU64>(), 0);
        debug_assert_eq!(write.as_ptr() as usize % std::mem::align_of::<AtomicU64>(), 0);

        Ok(Self {
            read,
            write,
            data,
            ring_bytes: desc.quantum_size() * desc.quantum_count(),
        })
    }

    fn read_counter(&self) -> &AtomicU64 {
        // SAFETY: validated to be 8 bytes, 8-aligned, and mapped for self's lifetime
        unsafe { &*(self.read.as_ptr() as *const AtomicU64) }
    }

    fn write_counter(&self) -> &AtomicU64 {
        // SAFETY: validated to be 8 bytes, 8-aligned, and mapped for self's lifetime
        unsafe { &*(self.write.as_ptr() as *const AtomicU64) }
    }

    fn available_to_read(&self) -> usize {
        // Advisory snapshot only; the transactions below do the acquire.
        self.write_counter()
            .load(Ordering::Relaxed)
            .wrapping_sub(self.read_counter().load(Ordering::Relaxed)) as usize
    }

    fn available_to_write(&self) -> usize {
        self.ring_bytes.saturating_sub(self.available_to_read())
    }

    /// Split `n_bytes` starting at counter `position` into ring spans.
    ///
    /// Callers guarantee `n_bytes <= ring_bytes`.
    fn transaction(&self, position: u64, n_bytes: usize) -> Transaction {
        let offset = (position % self.ring_bytes as u64) as usize;
        let contiguous = self.ring_bytes - offset;
        let base = self.data.as_ptr();

        // SAFETY: offset < ring_bytes, and the data grantor covers ring_bytes
        let at_offset = unsafe { base.add(offset) };

        if contiguous < n_bytes {
            Transaction {
                first: Span {
                    ptr: at_offset,
                    len: contiguous,
                },
                second: Some(Span {
                    ptr: base,
                    len: n_bytes - contiguous,
                }),
            }
        } else {
            Transaction {
                first: Span {
                    ptr: at_offset,
                    len: n_bytes,
                },
                second: None,
            }
        }
    }

    fn begin_write(&self, n_bytes: usize) -> Transaction {
        // Acquire pairs with commit_read: the consumer is done with the space we reuse.
        let _read = self.read_counter().load(Ordering::Acquire);
        let write = self.write_counter().load(Ordering::Relaxed);
        let tx = self.transaction(write, n_bytes);
        if tx.wraps() {
            tracing::trace!(position = write, n_bytes, "Write wraps ring");
        }
        tx
    }

    fn commit_write(&self, n_bytes_written: usize) {
        let write = self.write_counter().load(Ordering::Relaxed);
        self.write_counter()
            .store(write.wrapping_add(n_bytes_written as u64), Ordering::Release);
    }

    fn begin_read(&self, n_bytes: usize) -> Transaction {
        // Acquire pairs with commit_write: the producer's bytes are visible.
        let _write = self.write_counter().load(Ordering::Acquire);
        let read = self.read_counter().load(Ordering::Relaxed);
        let tx = self.transaction(read, n_bytes);
        if tx.wraps() {
            tracing::trace!(position = read, n_bytes, "Read wraps ring");
        }
        tx
    }

    fn commit_read(&self, n_bytes_read: usize) {
        let read = self.read_counter().load(Ordering::Relaxed);
        self.read_counter()
            .store(read.wrapping_add(n_bytes_read as u64), Ordering::Release);
    }

    fn write_bytes(&self, src: &[u8]) -> usize {
        let tx = self.begin_write(src.len());
        let mut copied = 0;
        for span in tx.spans() {
            // SAFETY: the span lies in the ring and is reserved for the producer
            // until commit_write; src has at least copied + span.len bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr().add(copied), span.ptr, span.len);
            }
            copied += span.len;
        }
        self.commit_write(copied);
        copied
    }

    fn read_bytes(&self, dst: &mut [u8]) -> usize {
        let tx = self.begin_read(dst.len());
        let mut copied = 0;
        for span in tx.spans() {
            // SAFETY: the span lies in the ring and was published by the producer;
            // dst has at least copied + span.len bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(span.ptr, dst.as_mut_ptr().add(copied), span.len);
            }
            copied += span.len;
        }
        self.commit_read(copied);
        copied
    }
}

/// Single-producer single-consumer queue of fixed-size `T` elements.
///
/// `T` is a plain-data type whose size must equal the descriptor's quantum
/// size. Construction checks this rather than trusting the caller.
///
/// The queue never blocks: a `write` without enough free space, or a `read`
/// without enough data, returns `false` and changes nothing. Waiting and
/// retry policy belong to the caller.
///
/// At most one producer and one consumer may use a descriptor at a time.
/// `read`/`write` take `&mut self`, so a single instance cannot be shared by
/// two producers, but two *instances* acting as producers on the same
/// descriptor are not detected.
pub struct MessageQueue<T> {
    desc: RegionDescriptor,
    ring: Option<MappedRing>,
    _element: PhantomData<fn() -> T>,
}

impl<T: AsBytes + FromBytes> MessageQueue<T> {
    /// Build a queue, marking it invalid on any descriptor or mapping failure.
    ///
    /// Check [`is_valid`](Self::is_valid) before use. The shared counters are
    /// never written here; initialising them is the allocating side's job.
    pub fn new(desc: RegionDescriptor) -> Self {
        let ring = match Self::open_ring(&desc) {
            Ok(ring) => Some(ring),
            Err(e) => {
                tracing::warn!(error = %e, "Message queue is invalid");
                None
            }
        };

        Self {
            desc,
            ring,
            _element: PhantomData,
        }
    }

    /// Build a queue, reporting why construction failed.
    pub fn try_new(desc: RegionDescriptor) -> QueueResult<Self> {
        let ring = Self::open_ring(&desc)?;
        Ok(Self {
            desc,
            ring: Some(ring),
            _element: PhantomData,
        })
    }

    fn open_ring(desc: &RegionDescriptor) -> QueueResult<MappedRing> {
        desc.validate(std::mem::size_of::<T>())?;
        let ring = MappedRing::map(desc)?;

        tracing::debug!(
            quantum_size = desc.quantum_size(),
            quantum_count = desc.quantum_count(),
            ring_bytes = ring.ring_bytes,
            "Opened message queue"
        );

        Ok(ring)
    }

    /// Write all of `elements`, or nothing.
    pub fn write(&mut self, elements: &[T]) -> bool {
        let Some(ring) = self.ring.as_ref() else {
            return false;
        };

        let bytes = elements.as_bytes();
        if bytes.is_empty() {
            return true;
        }
        if ring.available_to_write() < bytes.len() {
            return false;
        }

        ring.write_bytes(bytes) == bytes.len()
    }

    /// Write a single element.
    pub fn write_one(&mut self, element: &T) -> bool {
        self.write(std::slice::from_ref(element))
    }

    /// Fill all of `elements` from the queue, or read nothing.
    pub fn read(&mut self, elements: &mut [T]) -> bool {
        let Some(ring) = self.ring.as_ref() else {
            return false;
        };

        let bytes = elements.as_bytes_mut();
        if bytes.is_empty() {
            return true;
        }
        // A misbehaving peer can push the counters apart; never read past the ring.
        if bytes.len() > ring.ring_bytes || ring.available_to_read() < bytes.len() {
            return false;
        }

        ring.read_bytes(bytes) == bytes.len()
    }

    /// Read a single element.
    pub fn read_one(&mut self, element: &mut T) -> bool {
        self.read(std::slice::from_mut(element))
    }
}

impl<T> MessageQueue<T> {
    /// Bytes published by the producer and not yet consumed.
    pub fn available_to_read(&self) -> usize {
        self.ring.as_ref().map_or(0, MappedRing::available_to_read)
    }

    /// Bytes the producer may write right now.
    pub fn available_to_write(&self) -> usize {
        self.ring.as_ref().map_or(0, MappedRing::available_to_write)
    }

    pub fn quantum_size(&self) -> usize {
        self.desc.quantum_size()
    }

    pub fn quantum_count(&self) -> usize {
        self.desc.quantum_count()
    }

    /// True when the descriptor validated and all three regions are mapped.
    pub fn is_valid(&self) -> bool {
        self.ring.is_some()
    }

    pub fn descriptor(&self) -> &RegionDescriptor {
        &self.desc
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("quantum_size", &self.quantum_size())
            .field("quantum_count", &self.quantum_count())
            .field("valid", &self.is_valid())
            .field("available_to_read", &self.available_to_read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::segment::{QueueLayout, QueueSegment};

    fn segment(quantum_size: usize, quantum_count: usize) -> QueueSegment {
        let layout = QueueLayout::new(quantum_size, quantum_count).unwrap();
        QueueSegment::anonymous("queue-unit", layout).unwrap()
    }

    #[test]
    fn test_transaction_split() {
        let seg = segment(4, 4);
        let queue = MessageQueue::<u32>::new(seg.descriptor());
        let ring = queue.ring.as_ref().unwrap();
        let base = ring.data.as_ptr();

        let tx = ring.transaction(0, 16);
        assert!(!tx.wraps());
        assert_eq!(tx.len(), 16);
        assert_eq!(tx.first().as_ptr(), base);

        let tx = ring.transaction(12, 8);
        assert!(tx.wraps());
        assert_eq!(tx.first().len(), 4);
        assert_eq!(tx.second().unwrap().len(), 4);
        assert_eq!(tx.second().unwrap().as_ptr(), base);
        assert_eq!(tx.spans().count(), 2);

        // Counters keep growing past the ring size.
        let tx = ring.transaction(16 * 1000 + 8, 8);
        assert!(!tx.wraps());
        assert_eq!(tx.first().as_ptr(), unsafe { base.add(8) });
    }

    #[test]
    fn test_fresh_queue_is_empty() {
        let seg = segment(4, 8);
        let queue = MessageQueue::<u32>::new(seg.descriptor());
        assert!(queue.is_valid());
        assert_eq!(queue.available_to_read(), 0);
        assert_eq!(queue.available_to_write(), 32);
        assert_eq!(queue.quantum_size(), 4);
        assert_eq!(queue.quantum_count(), 8);
    }

    #[test]
    fn test_single_element_round_trip() {
        let seg = segment(8, 4);
        let mut queue = MessageQueue::<u64>::new(seg.descriptor());

        assert!(queue.write_one(&0xDEAD_BEEF));
        let mut out = 0u64;
        assert!(queue.read_one(&mut out));
        assert_eq!(out, 0xDEAD_BEEF);
        assert!(!queue.read_one(&mut out));
    }

    #[test]
    fn test_empty_slices_are_noops() {
        let seg = segment(4, 4);
        let mut queue = MessageQueue::<u32>::new(seg.descriptor());
        assert!(queue.write(&[]));
        assert!(queue.read(&mut []));
        assert_eq!(queue.available_to_read(), 0);
    }

    #[test]
    fn test_oversized_request_fails() {
        let seg = segment(4, 4);
        let mut queue = MessageQueue::<u32>::new(seg.descriptor());
        assert!(!queue.write(&[1, 2, 3, 4, 5]));
        assert_eq!(queue.available_to_write(), 16);

        let mut out = [0u32; 5];
        assert!(!queue.read(&mut out));
    }

    #[test]
    fn test_invalid_queue_reports_nothing() {
        let seg = segment(4, 4);
        let mut queue = MessageQueue::<u64>::new(seg.descriptor());
        assert!(!queue.is_valid());
        assert_eq!(queue.available_to_read(), 0);
        assert_eq!(queue.available_to_write(), 0);
        assert!(!queue.write(&[1]));
        assert!(!queue.read(&mut [0]));
        assert_eq!(queue.quantum_size(), 4);
    }

    #[test]
    fn test_try_new_reports_cause() {
        let seg = segment(4, 4);
        let err = MessageQueue::<u64>::try_new(seg.descriptor()).unwrap_err();
        assert!(matches!(
            err,
            QueueError::Descriptor(DescriptorError::QuantumSizeMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[test]
    fn test_array_elements() {
        let seg = segment(16, 3);
        let mut queue = MessageQueue::<[u8; 16]>::new(seg.descriptor());
        let a = [0xAAu8; 16];
        let b = [0xBBu8; 16];
        assert!(queue.write(&[a, b]));

        let mut out = [[0u8; 16]; 2];
        assert!(queue.read(&mut out));
        assert_eq!(out, [a, b]);
    }
}
