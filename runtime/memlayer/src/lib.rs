//! Shared-Heap Memory Layer - Chunk redirection for remote-addressable heaps
//!
//! # Purpose
//! A PGAS runtime registers one region of each process ("the shared heap")
//! with the network so remote processes can address it directly. The general
//! purpose allocator normally takes backing memory from the OS wherever it
//! likes; this crate replaces the allocator's chunk hooks so every chunk is
//! carved from the registered region instead, while the allocator keeps its
//! own size classes and free lists.
//!
//! # Integration Points
//! - Depends on: a [`CommLayer`] that reports the desired heap, and an
//!   [`UnderlyingAllocator`] binding (jemalloc-style arenas and chunk hooks)
//! - Provides to: runtime startup/shutdown ([`initialize_memory_layer`],
//!   [`shutdown_memory_layer`])
//!
//! # Architecture
//! ```text
//! CommLayer ──► MemoryLayer::init
//!                 ├─ standalone: one warm-up allocate/free, no hooks
//!                 └─ shared heap: SharedHeap ─► arena::bring_up ─► drain::run
//!                                    ▲
//!      allocator ── acquire ──► SharedHeapHooks (release/split/... declined)
//! ```
//!
//! # Testing Strategy
//! - Unit tests: reservation arithmetic, hook outcomes, bring-up and drain
//!   against the mock allocator
//! - Integration tests: end-to-end init, concurrent reservation, teardown
//! - Benches: reservation throughput under contention

pub mod allocator;
pub mod arena;
pub mod comm;
pub mod drain;
pub mod heap;
pub mod hooks;
pub mod layer;
pub mod size_class;

#[cfg(feature = "mock")]
pub mod mock;

pub use allocator::{AllocQuery, AllocatorError, UnderlyingAllocator};
pub use comm::{CommLayer, FixedRegion, HeapRequest, OwnedRegion, Standalone};
pub use drain::{ClassDrain, DrainReport};
pub use heap::{HeapStats, ReserveError, SharedHeap};
pub use hooks::{Chunk, ChunkFlags, ChunkHooks, ChunkRequest, ChunkSpan, HookOutcome, SharedHeapHooks};
pub use layer::{initialize_memory_layer, shutdown_memory_layer, MemoryLayer, Mode};
pub use size_class::SizeClassTable;

use thiserror::Error;

/// Fatal configuration and invariant violations
///
/// Any of these means remote addressing of the heap can no longer be
/// guaranteed. The process-level entry points abort on them.
#[derive(Debug, Error)]
pub enum MemLayerError {
    #[error("if heap address is specified, size must be also (base: {base:#x})")]
    MissingHeapSize { base: usize },

    #[error("shared heap [{base:#x}, +{size:#x}) wraps the address space")]
    RegionOverflow { base: usize, size: usize },

    #[error("could not get {query} from the allocator")]
    QueryFailed {
        query: AllocQuery,
        #[source]
        source: AllocatorError,
    },

    #[error("arena count {count} too large to fit into u32")]
    ArenaCountOverflow { count: usize },

    #[error("size class index {index} too large to fit into u32")]
    ClassIndexOverflow { index: usize },

    #[error("could not change current thread's arena to {arena}")]
    ArenaBind {
        arena: u32,
        #[source]
        source: AllocatorError,
    },

    #[error("could not update the chunk hooks of arena {arena}")]
    HookInstall {
        arena: u32,
        #[source]
        source: AllocatorError,
    },

    #[error("could not use up memory outside of shared heap (class size {class_size})")]
    DrainAllocationFailed { class_size: usize },

    #[error("cannot init heap: warm-up allocation failed")]
    WarmupFailed,

    #[error("could not allocate a {size:#x} byte region aligned to {align:#x}")]
    RegionAllocation { size: usize, align: usize },
}

pub type Result<T> = core::result::Result<T, MemLayerError>;

/// Round `addr` up to `align` (power of two). `None` on overflow.
#[inline]
pub fn align_up(addr: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    Some(addr.checked_add(align - 1)? & !(align - 1))
}
