//! Chunk Hook Adapter - Redirects chunk acquisition into the shared heap
//!
//! The allocator calls these hooks whenever it needs or wants to give back a
//! large backing block ("chunk"). [`SharedHeapHooks`] carves acquisitions out
//! of the [`SharedHeap`] and declines everything else, so the allocator keeps
//! every chunk it was handed and recycles it internally.
//!
//! Declining is not an error: the allocator's contract says it must fall back
//! to reuse when a hook opts out.

use crate::heap::{ReserveError, SharedHeap};
use bitflags::bitflags;
use core::ptr::NonNull;
use static_assertions::assert_impl_all;
use std::sync::Arc;

bitflags! {
    /// State of a freshly acquired chunk
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u8 {
        /// Every byte of the chunk is zero
        const ZEROED    = 1 << 0;
        /// Chunk is backed and usable without a separate commit
        const COMMITTED = 1 << 1;
    }
}

/// Acquisition request from the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Fixed address demanded for in-place growth, if any
    pub fixed_addr: Option<usize>,
    pub size: usize,
    /// Power of two
    pub alignment: usize,
    /// Caller requires zeroed memory
    pub zero: bool,
}

impl ChunkRequest {
    /// Anywhere-placed request
    pub fn new(size: usize, alignment: usize) -> Self {
        Self {
            fixed_addr: None,
            size,
            alignment,
            zero: false,
        }
    }

    pub fn zeroed(mut self) -> Self {
        self.zero = true;
        self
    }

    pub fn at(mut self, addr: usize) -> Self {
        self.fixed_addr = Some(addr);
        self
    }
}

/// Chunk handed to the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub addr: NonNull<u8>,
    pub size: usize,
    pub flags: ChunkFlags,
}

/// Existing chunk range passed back to a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub addr: usize,
    pub size: usize,
}

/// Result of a non-acquiring hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Operation performed
    Done,
    /// Operation not permitted; the allocator keeps the chunk as it is
    Declined,
}

/// Chunk hook table installed into each arena
///
/// Every method receives the index of the arena that invoked it.
pub trait ChunkHooks: Send + Sync {
    /// Provide a new chunk, or `None` when none can be supplied
    fn acquire(&self, request: ChunkRequest, arena: u32) -> Option<Chunk>;

    /// Give a whole chunk back
    fn release(&self, chunk: ChunkSpan, committed: bool, arena: u32) -> HookOutcome;

    /// Back `[offset, offset + length)` of a chunk with memory
    fn commit(&self, chunk: ChunkSpan, offset: usize, length: usize, arena: u32) -> HookOutcome;

    /// Drop the backing of `[offset, offset + length)`
    fn decommit(&self, chunk: ChunkSpan, offset: usize, length: usize, arena: u32) -> HookOutcome;

    /// Discard the contents of `[offset, offset + length)`
    fn purge(&self, chunk: ChunkSpan, offset: usize, length: usize, arena: u32) -> HookOutcome;

    /// Split one chunk into two independently tracked chunks
    fn split(&self, chunk: ChunkSpan, size_a: usize, size_b: usize, committed: bool, arena: u32) -> HookOutcome;

    /// Merge two adjacent chunks into one
    fn merge(&self, a: ChunkSpan, b: ChunkSpan, committed: bool, arena: u32) -> HookOutcome;
}

/// Hooks backed by the shared heap
#[derive(Debug, Clone)]
pub struct SharedHeapHooks {
    heap: Arc<SharedHeap>,
}

assert_impl_all!(SharedHeapHooks: Send, Sync);

impl SharedHeapHooks {
    pub fn new(heap: Arc<SharedHeap>) -> Self {
        Self { heap }
    }

    pub fn heap(&self) -> &Arc<SharedHeap> {
        &self.heap
    }
}

impl ChunkHooks for SharedHeapHooks {
    fn acquire(&self, request: ChunkRequest, arena: u32) -> Option<Chunk> {
        let reserved = match request.fixed_addr {
            Some(addr) => self.heap.reserve_at(addr, request.size, request.alignment),
            None => self.heap.reserve(request.size, request.alignment),
        };

        let addr = match reserved {
            Ok(addr) => addr,
            Err(ReserveError::Exhausted { requested, available }) => {
                log::debug!(
                    "arena {}: shared heap exhausted ({} requested, {} available)",
                    arena,
                    requested,
                    available
                );
                return None;
            }
            Err(err @ ReserveError::Misplaced { .. }) => {
                log::warn!("arena {}: {}", arena, err);
                return None;
            }
            Err(err @ ReserveError::InvalidAlignment(_)) => {
                log::error!("arena {}: {}", arena, err);
                return None;
            }
        };

        // The range is ours once the cursor moved; fill outside the lock
        let mut flags = ChunkFlags::COMMITTED;
        if request.zero {
            // SAFETY: [addr, addr + size) lies inside the registered region and
            // was reserved exclusively for this call.
            unsafe { core::ptr::write_bytes(addr as *mut u8, 0, request.size) };
            flags |= ChunkFlags::ZEROED;
        }

        log::trace!(
            "arena {}: chunk {:#x} +{:#x} (align {:#x})",
            arena,
            addr,
            request.size,
            request.alignment
        );

        Some(Chunk {
            addr: NonNull::new(addr as *mut u8)?,
            size: request.size,
            flags,
        })
    }

    fn release(&self, _chunk: ChunkSpan, _committed: bool, _arena: u32) -> HookOutcome {
        HookOutcome::Declined
    }

    fn commit(&self, _chunk: ChunkSpan, _offset: usize, _length: usize, _arena: u32) -> HookOutcome {
        HookOutcome::Declined
    }

    fn decommit(&self, _chunk: ChunkSpan, _offset: usize, _length: usize, _arena: u32) -> HookOutcome {
        HookOutcome::Declined
    }

    fn purge(&self, _chunk: ChunkSpan, _offset: usize, _length: usize, _arena: u32) -> HookOutcome {
        HookOutcome::Declined
    }

    fn split(&self, _chunk: ChunkSpan, _size_a: usize, _size_b: usize, _committed: bool, _arena: u32) -> HookOutcome {
        HookOutcome::Declined
    }

    fn merge(&self, _a: ChunkSpan, _b: ChunkSpan, _committed: bool, _arena: u32) -> HookOutcome {
        HookOutcome::Declined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_heap(size: usize) -> Arc<SharedHeap> {
        // Address-only heap; never dereferenced unless zero is requested
        Arc::new(SharedHeap::new(0x10_0000, size).unwrap())
    }

    #[test]
    fn test_acquire_from_heap() {
        let hooks = SharedHeapHooks::new(fake_heap(1 << 20));

        let chunk = hooks.acquire(ChunkRequest::new(4096, 4096), 0).unwrap();
        assert_eq!(chunk.addr.as_ptr() as usize, 0x10_0000);
        assert_eq!(chunk.size, 4096);
        assert_eq!(chunk.flags, ChunkFlags::COMMITTED);
        assert_eq!(hooks.heap().cursor(), 4096);
    }

    #[test]
    fn test_acquire_exhausted_is_none() {
        let hooks = SharedHeapHooks::new(fake_heap(4096));

        assert!(hooks.acquire(ChunkRequest::new(8192, 4096), 0).is_none());
        assert_eq!(hooks.heap().cursor(), 0);
    }

    #[test]
    fn test_fixed_address_must_match() {
        let hooks = SharedHeapHooks::new(fake_heap(1 << 20));
        hooks.acquire(ChunkRequest::new(4096, 4096), 0).unwrap();

        // Growing at the first chunk's address cannot be honoured
        let request = ChunkRequest::new(4096, 4096).at(0x10_0000);
        assert!(hooks.acquire(request, 0).is_none());
        assert_eq!(hooks.heap().cursor(), 4096);

        // Growing right after it can
        let request = ChunkRequest::new(4096, 4096).at(0x10_1000);
        let chunk = hooks.acquire(request, 0).unwrap();
        assert_eq!(chunk.addr.as_ptr() as usize, 0x10_1000);
        assert_eq!(hooks.heap().cursor(), 8192);
    }

    #[test]
    fn test_zero_fill() {
        let mut backing = vec![0xa5u8; 8192];
        let base = backing.as_mut_ptr() as usize;
        let hooks = SharedHeapHooks::new(Arc::new(SharedHeap::new(base, backing.len()).unwrap()));

        let chunk = hooks.acquire(ChunkRequest::new(1024, 8).zeroed(), 3).unwrap();
        assert!(chunk.flags.contains(ChunkFlags::ZEROED | ChunkFlags::COMMITTED));

        let offset = chunk.addr.as_ptr() as usize - base;
        assert!(backing[offset..offset + 1024].iter().all(|&b| b == 0));
        assert_eq!(backing[offset + 1024], 0xa5);
    }

    #[test]
    fn test_everything_else_declined() {
        let hooks = SharedHeapHooks::new(fake_heap(1 << 20));
        let chunk = hooks.acquire(ChunkRequest::new(8192, 4096), 0).unwrap();
        let span = ChunkSpan {
            addr: chunk.addr.as_ptr() as usize,
            size: chunk.size,
        };
        let before = hooks.heap().cursor();

        assert_eq!(hooks.release(span, true, 0), HookOutcome::Declined);
        assert_eq!(hooks.commit(span, 0, 4096, 0), HookOutcome::Declined);
        assert_eq!(hooks.decommit(span, 0, 4096, 0), HookOutcome::Declined);
        assert_eq!(hooks.purge(span, 0, 4096, 0), HookOutcome::Declined);
        assert_eq!(hooks.split(span, 4096, 4096, true, 0), HookOutcome::Declined);
        let other = ChunkSpan {
            addr: span.addr + span.size,
            size: 4096,
        };
        assert_eq!(hooks.merge(span, other, true, 0), HookOutcome::Declined);

        assert_eq!(hooks.heap().cursor(), before);
    }
}
