//! Shared-Heap State - Bump-pointer descriptor for the registered region
//!
//! One [`SharedHeap`] exists per process in production. It is handed to the
//! chunk hooks by `Arc`, so tests can build as many independent heaps as they
//! like. The region itself is owned by the communication layer; this type only
//! hands out ranges of it and never gives them back.
//!
//! # Invariants
//! - `0 <= cursor <= size`, at all times
//! - `cursor` never decreases, including across failed reservations
//! - Two successful reservations never overlap

use crate::{align_up, MemLayerError, Result};
use spin::Mutex;
use static_assertions::assert_impl_all;
use thiserror::Error;

/// Why a reservation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReserveError {
    #[error("shared heap exhausted (requested {requested} bytes, {available} available)")]
    Exhausted { requested: usize, available: usize },

    /// A fixed-address request did not match the next aligned position
    #[error("fixed chunk address {requested:#x} is not the next heap position {next:#x}")]
    Misplaced { requested: usize, next: usize },

    #[error("alignment {0:#x} is not a power of two")]
    InvalidAlignment(usize),
}

/// Snapshot of heap usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Total region length in bytes
    pub size: usize,
    /// Current cursor (bytes consumed, alignment padding included)
    pub used: usize,
    /// `size - used`
    pub available: usize,
    /// Successful reservations
    pub chunks: usize,
    /// Refused reservations of any kind
    pub failures: usize,
}

#[derive(Debug, Default)]
struct Cursor {
    offset: usize,
    chunks: usize,
    failures: usize,
}

/// Bump allocator over the pre-registered shared region
#[derive(Debug)]
pub struct SharedHeap {
    base: usize,
    size: usize,
    cursor: Mutex<Cursor>,
}

assert_impl_all!(SharedHeap: Send, Sync);

impl SharedHeap {
    /// Describe the region `[base, base + size)`
    ///
    /// # Errors
    /// `MissingHeapSize` when `size` is zero, `RegionOverflow` when the region
    /// does not fit in the address space.
    pub fn new(base: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(MemLayerError::MissingHeapSize { base });
        }
        if base.checked_add(size).is_none() {
            return Err(MemLayerError::RegionOverflow { base, size });
        }

        Ok(Self {
            base,
            size,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    /// Base address of the region
    pub fn base(&self) -> usize {
        self.base
    }

    /// Region length in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Current cursor offset
    pub fn cursor(&self) -> usize {
        self.cursor.lock().offset
    }

    /// Whether `addr` lies inside `[base, base + size)`
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// Reserve `size` bytes at the next `alignment` boundary
    ///
    /// Returns the aligned address. The whole check-and-advance runs under the
    /// heap lock; the caller owns the returned range exclusively.
    ///
    /// # Errors
    /// `Exhausted` when the region cannot hold the request; the cursor is left
    /// untouched.
    pub fn reserve(&self, size: usize, alignment: usize) -> core::result::Result<usize, ReserveError> {
        self.reserve_inner(None, size, alignment)
    }

    /// Reserve `size` bytes, succeeding only if they start exactly at `addr`
    ///
    /// Used when the allocator asks to grow a chunk in place. Nothing is
    /// consumed when `addr` is not the next aligned position.
    pub fn reserve_at(
        &self,
        addr: usize,
        size: usize,
        alignment: usize,
    ) -> core::result::Result<usize, ReserveError> {
        self.reserve_inner(Some(addr), size, alignment)
    }

    fn reserve_inner(
        &self,
        fixed: Option<usize>,
        size: usize,
        alignment: usize,
    ) -> core::result::Result<usize, ReserveError> {
        if !alignment.is_power_of_two() {
            self.cursor.lock().failures += 1;
            return Err(ReserveError::InvalidAlignment(alignment));
        }

        let mut cursor = self.cursor.lock();

        // base + offset cannot wrap: offset <= size and new() checked base + size
        let candidate = self.base + cursor.offset;
        let aligned = match align_up(candidate, alignment) {
            Some(aligned) => aligned,
            None => {
                cursor.failures += 1;
                return Err(ReserveError::Exhausted {
                    requested: size,
                    available: 0,
                });
            }
        };

        if let Some(requested) = fixed {
            if requested != aligned {
                cursor.failures += 1;
                return Err(ReserveError::Misplaced {
                    requested,
                    next: aligned,
                });
            }
        }

        let new_offset = aligned - self.base;
        let available = self.size.saturating_sub(new_offset);
        if new_offset > self.size || size > available {
            cursor.failures += 1;
            return Err(ReserveError::Exhausted {
                requested: size,
                available,
            });
        }

        cursor.offset = new_offset + size;
        cursor.chunks += 1;
        Ok(aligned)
    }

    /// Usage snapshot
    pub fn stats(&self) -> HeapStats {
        let cursor = self.cursor.lock();
        HeapStats {
            size: self.size,
            used: cursor.offset,
            available: self.size - cursor.offset,
            chunks: cursor.chunks,
            failures: cursor.failures,
        }
    }
}
