//! Init/Teardown Entrypoint - Mode selection and lifecycle
//!
//! The mode is picked once at startup from the communication layer's heap
//! request and never revisited:
//! - **Shared heap**: descriptor, arena bring-up, bootstrap drain
//! - **Standalone**: one warm-up allocate/free so the allocator finishes its
//!   lazy global setup; no hooks
//!
//! [`MemoryLayer::init`] reports failures as [`MemLayerError`] values.
//! [`initialize_memory_layer`] is what the runtime calls: it aborts the process
//! on any of them, before user code runs.

use crate::allocator::UnderlyingAllocator;
use crate::arena;
use crate::comm::CommLayer;
use crate::drain::{self, DrainReport};
use crate::heap::{HeapStats, SharedHeap};
use crate::hooks::{ChunkHooks, SharedHeapHooks};
use crate::{MemLayerError, Result};
use std::sync::Arc;

/// Configuration chosen at startup
#[derive(Debug)]
pub enum Mode {
    /// No shared heap; the allocator runs unmodified
    Standalone,

    /// Allocator chunks come from the shared heap
    SharedHeap {
        heap: Arc<SharedHeap>,
        arenas: u32,
        drain: DrainReport,
    },
}

/// Live memory layer, from startup to shutdown
#[derive(Debug)]
pub struct MemoryLayer {
    mode: Mode,
}

impl MemoryLayer {
    /// Select the mode and bring the allocator up accordingly
    ///
    /// # Errors
    /// Any fatal configuration error: heap base without size, allocator
    /// queries or arena binding failing, hook installation failing, or a
    /// drain/warm-up allocation returning nothing.
    pub fn init(comm: &dyn CommLayer, allocator: &dyn UnderlyingAllocator) -> Result<Self> {
        let request = comm.desired_shared_heap();

        let base = match request.base {
            Some(base) => base.as_ptr() as usize,
            None => {
                warm_up(allocator)?;
                log::info!("memory layer: standalone, no shared heap");
                return Ok(Self { mode: Mode::Standalone });
            }
        };

        if request.size == 0 {
            return Err(MemLayerError::MissingHeapSize { base });
        }

        let heap = Arc::new(SharedHeap::new(base, request.size)?);
        let hooks: Arc<dyn ChunkHooks> = Arc::new(SharedHeapHooks::new(Arc::clone(&heap)));

        let arenas = arena::bring_up(allocator, hooks)?;
        let drain = drain::run(allocator, &heap)?;

        log::info!(
            "memory layer: shared heap {:#x} +{:#x}, {} arenas, {} bytes used after drain",
            base,
            request.size,
            arenas,
            heap.cursor()
        );

        Ok(Self {
            mode: Mode::SharedHeap { heap, arenas, drain },
        })
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.mode, Mode::SharedHeap { .. })
    }

    /// Shared heap descriptor, if in shared-heap mode
    pub fn heap(&self) -> Option<&Arc<SharedHeap>> {
        match &self.mode {
            Mode::SharedHeap { heap, .. } => Some(heap),
            Mode::Standalone => None,
        }
    }

    pub fn heap_stats(&self) -> Option<HeapStats> {
        self.heap().map(|heap| heap.stats())
    }

    /// Drop the layer's handle on the descriptor
    ///
    /// The region belongs to the communication layer and is not freed here.
    /// Hooks still installed in the allocator keep the descriptor alive.
    pub fn shutdown(self) -> Option<HeapStats> {
        match self.mode {
            Mode::Standalone => None,
            Mode::SharedHeap { heap, .. } => {
                let stats = heap.stats();
                log::info!(
                    "memory layer: shutdown, {} of {} bytes used in {} chunks ({} refused)",
                    stats.used,
                    stats.size,
                    stats.chunks,
                    stats.failures
                );
                Some(stats)
            }
        }
    }
}

fn warm_up(allocator: &dyn UnderlyingAllocator) -> Result<()> {
    let ptr = allocator.allocate(1).ok_or(MemLayerError::WarmupFailed)?;
    // SAFETY: ptr was just returned by this allocator
    unsafe { allocator.free(ptr) };
    Ok(())
}

/// Bring the memory layer up, aborting the process on any failure
pub fn initialize_memory_layer(comm: &dyn CommLayer, allocator: &dyn UnderlyingAllocator) -> MemoryLayer {
    match MemoryLayer::init(comm, allocator) {
        Ok(layer) => layer,
        Err(err) => fatal(&err),
    }
}

/// Tear the memory layer down
pub fn shutdown_memory_layer(layer: MemoryLayer) {
    let _ = layer.shutdown();
}

fn fatal(err: &MemLayerError) -> ! {
    log::error!("memory layer: {}", err);
    eprintln!("internal error: {}", err);
    std::process::abort()
}
