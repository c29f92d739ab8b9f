//! Arena Bring-up - Initialize every arena and install the chunk hooks
//!
//! Arenas other than arena 0 initialize lazily the first time a thread binds
//! to them, and hooks can only be installed into an initialized arena. Bring-up
//! therefore walks the calling thread through arenas `1..n`, returns it to
//! arena 0, then installs the hook table everywhere.
//!
//! Must finish before any application thread allocates: hook installation is
//! not safe against concurrent allocation in the same arena.

use crate::allocator::{AllocQuery, UnderlyingAllocator};
use crate::hooks::ChunkHooks;
use crate::size_class::query;
use crate::{MemLayerError, Result};
use std::sync::Arc;

/// Number of arenas the allocator was configured with
///
/// # Errors
/// `QueryFailed` if the allocator cannot answer, `ArenaCountOverflow` if the
/// count is not representable as an arena index.
pub fn arena_count(allocator: &dyn UnderlyingAllocator) -> Result<u32> {
    let count = query(allocator, AllocQuery::ArenaCount)?;
    u32::try_from(count).map_err(|_| MemLayerError::ArenaCountOverflow { count })
}

/// Force lazy initialization of arenas `1..narenas`
///
/// The calling thread ends up bound to arena 0 again.
pub fn initialize_arenas(allocator: &dyn UnderlyingAllocator, narenas: u32) -> Result<()> {
    for arena in 1..narenas {
        allocator
            .bind_current_thread_to_arena(arena)
            .map_err(|source| MemLayerError::ArenaBind { arena, source })?;
    }

    allocator
        .bind_current_thread_to_arena(0)
        .map_err(|source| MemLayerError::ArenaBind { arena: 0, source })
}

/// Replace the chunk hooks of arenas `0..narenas`
pub fn install_hooks(
    allocator: &dyn UnderlyingAllocator,
    narenas: u32,
    hooks: &Arc<dyn ChunkHooks>,
) -> Result<()> {
    for arena in 0..narenas {
        allocator
            .install_chunk_hooks(arena, Arc::clone(hooks))
            .map_err(|source| MemLayerError::HookInstall { arena, source })?;
    }
    Ok(())
}

/// Initialize all arenas and install `hooks` into each one
///
/// Returns the number of arenas brought up.
pub fn bring_up(allocator: &dyn UnderlyingAllocator, hooks: Arc<dyn ChunkHooks>) -> Result<u32> {
    let narenas = arena_count(allocator)?;
    log::debug!("bringing up {} arenas", narenas);

    initialize_arenas(allocator, narenas)?;
    install_hooks(allocator, narenas, &hooks)?;

    log::debug!("chunk hooks installed in {} arenas", narenas);
    Ok(narenas)
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::heap::SharedHeap;
    use crate::hooks::SharedHeapHooks;
    use crate::mock::MockAllocator;
    use crate::AllocatorError;

    fn hooks() -> Arc<dyn ChunkHooks> {
        Arc::new(SharedHeapHooks::new(Arc::new(
            SharedHeap::new(0x10_0000, 1 << 20).unwrap(),
        )))
    }

    #[test]
    fn test_bring_up_all_arenas() {
        let allocator = MockAllocator::builder().arenas(4).build();

        let narenas = bring_up(&allocator, hooks()).unwrap();
        assert_eq!(narenas, 4);

        let stats = allocator.stats();
        // Arenas 1..4, then back to 0
        assert_eq!(stats.binds, 4);
        assert_eq!(stats.hook_installs, 4);
        for arena in 0..4 {
            assert!(allocator.arena_initialized(arena));
            assert!(allocator.arena_hooked(arena));
        }
        assert_eq!(allocator.current_arena(), 0);
    }

    #[test]
    fn test_single_arena_needs_no_init() {
        let allocator = MockAllocator::builder().arenas(1).build();

        bring_up(&allocator, hooks()).unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.binds, 1);
        assert_eq!(stats.hook_installs, 1);
    }

    #[test]
    fn test_arena_count_query_failure() {
        let allocator = MockAllocator::builder()
            .reject_query(AllocQuery::ArenaCount)
            .build();

        let err = bring_up(&allocator, hooks()).unwrap_err();
        assert!(matches!(
            err,
            MemLayerError::QueryFailed {
                query: AllocQuery::ArenaCount,
                source: AllocatorError::UnsupportedQuery(AllocQuery::ArenaCount),
            }
        ));
        assert_eq!(allocator.stats().hook_installs, 0);
    }

    #[test]
    fn test_hook_install_failure() {
        let allocator = MockAllocator::builder().arenas(2).build();

        // Skipping initialization leaves arena 1 unable to take hooks
        let err = install_hooks(&allocator, 2, &hooks()).unwrap_err();
        assert!(matches!(err, MemLayerError::HookInstall { arena: 1, .. }));
    }
}
