//! Underlying allocator interface
//!
//! The memory layer never implements object allocation itself. It talks to an
//! arena-based chunk allocator (jemalloc-style) through this trait: typed
//! introspection queries, explicit thread-to-arena binding, hook installation,
//! and plain allocate/free used by the warm-up and the bootstrap drain.

use crate::hooks::ChunkHooks;
use core::fmt;
use core::ptr::NonNull;
use std::sync::Arc;
use thiserror::Error;

/// Typed introspection queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocQuery {
    /// Number of arenas configured at process start
    ArenaCount,
    /// Number of small-object size classes
    SmallClassCount,
    /// Number of large-object size classes
    LargeClassCount,
    /// Byte size of small class `i`
    SmallClassSize(u32),
    /// Byte size of large class `i`
    LargeClassSize(u32),
}

impl fmt::Display for AllocQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocQuery::ArenaCount => write!(f, "arena count"),
            AllocQuery::SmallClassCount => write!(f, "small class count"),
            AllocQuery::LargeClassCount => write!(f, "large class count"),
            AllocQuery::SmallClassSize(i) => write!(f, "small class {} size", i),
            AllocQuery::LargeClassSize(i) => write!(f, "large class {} size", i),
        }
    }
}

/// Errors reported by the allocator binding
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error("query not supported: {0}")]
    UnsupportedQuery(AllocQuery),

    #[error("no such arena: {0}")]
    NoSuchArena(u32),

    #[error("allocator rejected the request: {0}")]
    Rejected(String),
}

/// Arena-based allocator whose chunk acquisition can be redirected
///
/// Implementations wrap a real allocator binding in production and
/// [`crate::mock::MockAllocator`] in tests.
pub trait UnderlyingAllocator: Send + Sync {
    /// Answer an introspection query
    fn query(&self, query: AllocQuery) -> Result<usize, AllocatorError>;

    /// Bind the calling thread to `arena`, initializing it on first use
    fn bind_current_thread_to_arena(&self, arena: u32) -> Result<(), AllocatorError>;

    /// Replace the chunk hooks of `arena`
    fn install_chunk_hooks(&self, arena: u32, hooks: Arc<dyn ChunkHooks>) -> Result<(), AllocatorError>;

    /// Allocate `size` bytes through the normal object path
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Return an object obtained from [`UnderlyingAllocator::allocate`]
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this allocator and not be freed twice.
    unsafe fn free(&self, ptr: NonNull<u8>);
}
