//! Communication-layer heap query
//!
//! The network layer decides whether a shared heap is needed and where it
//! lives. It reports that through [`CommLayer::desired_shared_heap`]; a
//! missing base selects standalone mode.

use crate::{MemLayerError, Result};
use core::ptr::NonNull;
use std::alloc::{self, Layout};

/// Heap requested by the communication layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRequest {
    /// Start of the pre-registered region, `None` for standalone mode
    pub base: Option<NonNull<u8>>,
    /// Region length in bytes
    pub size: usize,
}

impl HeapRequest {
    /// No shared heap
    pub const fn none() -> Self {
        Self { base: None, size: 0 }
    }

    pub fn is_shared(&self) -> bool {
        self.base.is_some()
    }
}

/// Source of the shared heap description
pub trait CommLayer {
    fn desired_shared_heap(&self) -> HeapRequest;
}

/// Communication layer that never wants a shared heap
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

impl CommLayer for Standalone {
    fn desired_shared_heap(&self) -> HeapRequest {
        HeapRequest::none()
    }
}

/// Region registered elsewhere, reported as-is
#[derive(Debug, Clone, Copy)]
pub struct FixedRegion {
    base: NonNull<u8>,
    size: usize,
}

impl FixedRegion {
    /// # Safety
    /// `[base, base + size)` must be writable memory that outlives every
    /// allocation made through the memory layer.
    pub unsafe fn new(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }
}

impl CommLayer for FixedRegion {
    fn desired_shared_heap(&self) -> HeapRequest {
        HeapRequest {
            base: Some(self.base),
            size: self.size,
        }
    }
}

/// Region allocated from the system allocator and freed on drop
///
/// Stands in for a registered segment when no network layer is present
/// (tests, the probe tool). It must outlive the allocator using it.
#[derive(Debug)]
pub struct OwnedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region is plain memory owned by this value
unsafe impl Send for OwnedRegion {}
unsafe impl Sync for OwnedRegion {}

impl OwnedRegion {
    /// Allocate `size` bytes aligned to `align`
    ///
    /// # Errors
    /// `RegionAllocation` if the layout is invalid or the system is out of
    /// memory.
    pub fn new(size: usize, align: usize) -> Result<Self> {
        let err = || MemLayerError::RegionAllocation { size, align };
        if size == 0 {
            return Err(err());
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| err())?;

        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(err)?;

        Ok(Self { ptr, layout })
    }

    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr - self.base() < self.size()
    }
}

impl CommLayer for OwnedRegion {
    fn desired_shared_heap(&self) -> HeapRequest {
        HeapRequest {
            base: Some(self.ptr),
            size: self.layout.size(),
        }
    }
}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in new() with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standalone_request() {
        let request = Standalone.desired_shared_heap();
        assert!(!request.is_shared());
        assert_eq!(request.size, 0);
    }

    #[test]
    fn test_owned_region() {
        let region = OwnedRegion::new(64 * 1024, 4096).unwrap();
        assert_eq!(region.base() % 4096, 0);
        assert_eq!(region.size(), 64 * 1024);

        let request = region.desired_shared_heap();
        assert_eq!(request.base.map(|p| p.as_ptr() as usize), Some(region.base()));
        assert_eq!(request.size, 64 * 1024);
        assert!(region.contains(region.base()));
        assert!(!region.contains(region.base() + region.size()));
    }

    #[test]
    fn test_owned_region_rejects_bad_layout() {
        assert!(OwnedRegion::new(0, 4096).is_err());
        assert!(OwnedRegion::new(4096, 3).is_err());
    }

    #[test]
    fn test_fixed_region_reports_as_given() {
        let mut backing = [0u8; 256];
        let base = NonNull::new(backing.as_mut_ptr()).unwrap();
        let region = unsafe { FixedRegion::new(base, 0) };

        let request = region.desired_shared_heap();
        assert_eq!(request.base, Some(base));
        assert_eq!(request.size, 0);
    }
}
