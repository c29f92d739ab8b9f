//! Bootstrap Drain - Neutralize memory the allocator took before the hooks
//!
//! Before interception the allocator may already hold OS memory for its own
//! bootstrap, partly carved into size-class runs. Anything still free in those
//! runs would later be handed to the application from outside the shared heap.
//!
//! For each class, largest first, the drain allocates until an allocation lands
//! inside the heap. Off-heap blocks are kept forever: handing them back would
//! put them on the class free list, and the next request would return the same
//! block. The first in-heap block is freed; from then on that class is served
//! from hooked chunks only. Huge classes come from a separate pool and are
//! skipped.

use crate::allocator::UnderlyingAllocator;
use crate::heap::SharedHeap;
use crate::size_class::SizeClassTable;
use crate::{MemLayerError, Result};

/// Per-class drain result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDrain {
    pub class_size: usize,
    /// Allocations issued, including the final in-heap one
    pub allocations: usize,
}

impl ClassDrain {
    /// Off-heap blocks left allocated
    pub fn leaked(&self) -> usize {
        self.allocations.saturating_sub(1)
    }
}

/// Outcome of a full drain, in processing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub classes: Vec<ClassDrain>,
}

impl DrainReport {
    /// Total off-heap blocks left allocated
    pub fn leaked_blocks(&self) -> usize {
        self.classes.iter().map(ClassDrain::leaked).sum()
    }

    /// Total off-heap bytes left allocated
    pub fn leaked_bytes(&self) -> usize {
        self.classes.iter().map(|c| c.leaked() * c.class_size).sum()
    }

    pub fn class(&self, class_size: usize) -> Option<&ClassDrain> {
        self.classes.iter().find(|c| c.class_size == class_size)
    }
}

/// Drain one class until an allocation comes from `heap`
///
/// # Errors
/// `DrainAllocationFailed` if the allocator returns nothing at all.
pub fn drain_class(
    allocator: &dyn UnderlyingAllocator,
    heap: &SharedHeap,
    class_size: usize,
) -> Result<ClassDrain> {
    let mut allocations = 0;

    loop {
        let ptr = allocator
            .allocate(class_size)
            .ok_or(MemLayerError::DrainAllocationFailed { class_size })?;
        allocations += 1;

        if heap.contains(ptr.as_ptr() as usize) {
            // SAFETY: ptr was just returned by this allocator and not yet freed
            unsafe { allocator.free(ptr) };
            return Ok(ClassDrain {
                class_size,
                allocations,
            });
        }
    }
}

/// Drain every class of `table`, largest first
pub fn drain(
    allocator: &dyn UnderlyingAllocator,
    heap: &SharedHeap,
    table: &SizeClassTable,
) -> Result<DrainReport> {
    let mut report = DrainReport::default();

    for class_size in table.largest_first() {
        let class = drain_class(allocator, heap, class_size)?;
        if class.leaked() > 0 {
            log::debug!(
                "class {}: left {} off-heap blocks allocated",
                class_size,
                class.leaked()
            );
        }
        report.classes.push(class);
    }

    Ok(report)
}

/// Query the class table and drain it
pub fn run(allocator: &dyn UnderlyingAllocator, heap: &SharedHeap) -> Result<DrainReport> {
    let table = SizeClassTable::query(allocator)?;
    let report = drain(allocator, heap, &table)?;

    log::debug!(
        "drained {} classes, {} off-heap blocks ({} bytes) neutralized",
        report.classes.len(),
        report.leaked_blocks(),
        report.leaked_bytes()
    );
    Ok(report)
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::arena;
    use crate::comm::OwnedRegion;
    use crate::hooks::{ChunkHooks, SharedHeapHooks};
    use crate::mock::MockAllocator;
    use std::sync::Arc;

    fn hooked(allocator: &MockAllocator, region: &OwnedRegion) -> Arc<SharedHeap> {
        let heap = Arc::new(SharedHeap::new(region.base(), region.size()).unwrap());
        let hooks: Arc<dyn ChunkHooks> = Arc::new(SharedHeapHooks::new(Arc::clone(&heap)));
        arena::bring_up(allocator, hooks).unwrap();
        heap
    }

    #[test]
    fn test_drain_stops_at_first_in_heap_block() {
        let region = OwnedRegion::new(1 << 20, 4096).unwrap();
        let allocator = MockAllocator::builder()
            .small_classes(&[16, 32])
            .large_classes(&[4096])
            .chunk_size(16 * 1024)
            .bootstrap_slots(4096, 2)
            .build();
        let heap = hooked(&allocator, &region);

        let report = run(&allocator, &heap).unwrap();

        let sizes: Vec<_> = report.classes.iter().map(|c| c.class_size).collect();
        assert_eq!(sizes, vec![4096, 32, 16]);
        assert_eq!(report.class(4096).unwrap().allocations, 3);
        assert_eq!(report.class(32).unwrap().allocations, 1);
        assert_eq!(report.class(16).unwrap().allocations, 1);
        assert_eq!(report.leaked_blocks(), 2);
        assert_eq!(report.leaked_bytes(), 2 * 4096);
    }

    #[test]
    fn test_drained_class_stays_in_heap() {
        let region = OwnedRegion::new(1 << 20, 4096).unwrap();
        let allocator = MockAllocator::builder()
            .small_classes(&[64])
            .large_classes(&[])
            .chunk_size(4096)
            .bootstrap_slots(64, 5)
            .build();
        let heap = hooked(&allocator, &region);

        let report = run(&allocator, &heap).unwrap();
        assert_eq!(report.class(64).unwrap().allocations, 6);

        for _ in 0..100 {
            let ptr = allocator.allocate(64).unwrap();
            assert!(heap.contains(ptr.as_ptr() as usize));
        }
    }

    #[test]
    fn test_allocation_failure_is_fatal() {
        let region = OwnedRegion::new(1 << 20, 4096).unwrap();
        let allocator = MockAllocator::builder()
            .small_classes(&[16, 32])
            .large_classes(&[])
            .failing_class(32)
            .build();
        let heap = hooked(&allocator, &region);

        let err = run(&allocator, &heap).unwrap_err();
        assert!(matches!(err, MemLayerError::DrainAllocationFailed { class_size: 32 }));
    }

    #[test]
    fn test_exhausted_heap_fails_drain() {
        // Too small for even one chunk
        let region = OwnedRegion::new(4096, 4096).unwrap();
        let allocator = MockAllocator::builder()
            .small_classes(&[16])
            .large_classes(&[])
            .chunk_size(64 * 1024)
            .build();
        let heap = hooked(&allocator, &region);

        let err = run(&allocator, &heap).unwrap_err();
        assert!(matches!(err, MemLayerError::DrainAllocationFailed { class_size: 16 }));
    }
}
