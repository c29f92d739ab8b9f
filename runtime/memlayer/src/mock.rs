//! Mock arena allocator
//!
//! # WARNING: This is NOT a real allocator binding!
//!
//! A small simulation of a jemalloc-style allocator, enough to exercise the
//! memory layer without linking one:
//! - arenas that initialize when a thread first binds to them (arena 0 starts
//!   initialized), each with its own hook table
//! - per-class bins: LIFO free list, then the current run, then a fresh chunk
//! - chunks from the arena's hooks once installed, from the system before that
//! - "bootstrap" runs: off-heap slots the allocator already owns at startup
//! - requests above the largest class are huge and get a dedicated chunk
//!
//! Everything is tracked in a single lock; it is built for correctness checks,
//! not speed.

use crate::allocator::{AllocQuery, AllocatorError, UnderlyingAllocator};
use crate::hooks::{ChunkHooks, ChunkRequest, ChunkSpan, HookOutcome};
use crate::align_up;
use core::ptr::NonNull;
use spin::Mutex;
use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Default small classes (bytes)
pub const DEFAULT_SMALL_CLASSES: &[usize] = &[
    8, 16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1536, 2048, 3072,
];

/// Default large classes (bytes)
pub const DEFAULT_LARGE_CLASSES: &[usize] = &[4096, 8192, 16384, 32768];

/// Default chunk size and alignment
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Counters of calls made into the mock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub allocations: usize,
    pub frees: usize,
    pub binds: usize,
    pub hook_installs: usize,
    pub trims: usize,
    /// Chunks obtained through installed hooks
    pub hooked_chunks: usize,
    /// Chunks obtained from the system
    pub system_chunks: usize,
}

/// Builder for [`MockAllocator`]
#[derive(Debug, Clone)]
pub struct MockAllocatorBuilder {
    arenas: u32,
    small: Vec<usize>,
    large: Vec<usize>,
    chunk_size: usize,
    bootstrap: Vec<(usize, usize)>,
    failing: Vec<usize>,
    rejected: Vec<AllocQuery>,
}

impl Default for MockAllocatorBuilder {
    fn default() -> Self {
        Self {
            arenas: 4,
            small: DEFAULT_SMALL_CLASSES.to_vec(),
            large: DEFAULT_LARGE_CLASSES.to_vec(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            bootstrap: Vec::new(),
            failing: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl MockAllocatorBuilder {
    pub fn arenas(mut self, arenas: u32) -> Self {
        self.arenas = arenas;
        self
    }

    pub fn small_classes(mut self, sizes: &[usize]) -> Self {
        self.small = sizes.to_vec();
        self
    }

    pub fn large_classes(mut self, sizes: &[usize]) -> Self {
        self.large = sizes.to_vec();
        self
    }

    /// Chunk size; also the chunk alignment. Rounded up to a power of two.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1).next_power_of_two();
        self
    }

    /// Give arena 0 a pre-hook run holding `slots` free objects of `class_size`
    pub fn bootstrap_slots(mut self, class_size: usize, slots: usize) -> Self {
        self.bootstrap.push((class_size, slots));
        self
    }

    /// Make every allocation that maps to `class_size` fail
    pub fn failing_class(mut self, class_size: usize) -> Self {
        self.failing.push(class_size);
        self
    }

    /// Answer `query` with `UnsupportedQuery`
    pub fn reject_query(mut self, query: AllocQuery) -> Self {
        self.rejected.push(query);
        self
    }

    pub fn build(self) -> MockAllocator {
        let classes: Vec<usize> = self.small.iter().chain(self.large.iter()).copied().collect();
        let arenas = (0..self.arenas)
            .map(|i| Arena::new(i == 0, classes.len()))
            .collect();

        let mut state = State {
            arenas,
            bindings: HashMap::new(),
            live: HashMap::new(),
            system: Vec::new(),
            huge_free: Vec::new(),
            stats: MockStats::default(),
        };

        for &(class_size, slots) in &self.bootstrap {
            let Some(idx) = classes.iter().position(|&c| c == class_size) else {
                log::warn!("mock: no class of size {} for bootstrap slots", class_size);
                continue;
            };
            if slots == 0 || state.arenas.is_empty() {
                continue;
            }
            if let Some(base) = state.system_chunk(class_size * slots, self.chunk_size) {
                state.arenas[0].bins[idx].run = Some(Run {
                    next: base,
                    end: base + class_size * slots,
                });
            }
        }

        MockAllocator {
            classes,
            small_count: self.small.len(),
            chunk_size: self.chunk_size,
            failing: self.failing,
            rejected: self.rejected,
            state: Mutex::new(state),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    next: usize,
    end: usize,
}

#[derive(Debug, Default)]
struct Bin {
    free: Vec<usize>,
    run: Option<Run>,
}

#[derive(Debug, Clone, Copy)]
struct OwnedChunk {
    addr: usize,
    size: usize,
}

struct Arena {
    initialized: bool,
    hooks: Option<Arc<dyn ChunkHooks>>,
    bins: Vec<Bin>,
    /// Chunks obtained through this arena's hooks
    chunks: Vec<OwnedChunk>,
}

impl Arena {
    fn new(initialized: bool, classes: usize) -> Self {
        Self {
            initialized,
            hooks: None,
            bins: (0..classes).map(|_| Bin::default()).collect(),
            chunks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Live {
    Small { arena: u32, class: usize },
    Huge(OwnedChunk),
}

struct State {
    arenas: Vec<Arena>,
    bindings: HashMap<ThreadId, u32>,
    live: HashMap<usize, Live>,
    /// System allocations to release on drop
    system: Vec<(usize, Layout)>,
    huge_free: Vec<OwnedChunk>,
    stats: MockStats,
}

impl State {
    fn system_chunk(&mut self, size: usize, align: usize) -> Option<usize> {
        let layout = Layout::from_size_align(size.max(1), align).ok()?;
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        self.system.push((ptr as usize, layout));
        self.stats.system_chunks += 1;
        Some(ptr as usize)
    }

    /// New chunk for `arena`: hooks if installed, system otherwise
    fn new_chunk(&mut self, arena: u32, size: usize, align: usize) -> Option<OwnedChunk> {
        let hooks = self.arenas[arena as usize].hooks.clone();
        let addr = match hooks {
            Some(hooks) => {
                let chunk = hooks.acquire(ChunkRequest::new(size, align), arena)?;
                let owned = OwnedChunk {
                    addr: chunk.addr.as_ptr() as usize,
                    size: chunk.size,
                };
                self.arenas[arena as usize].chunks.push(owned);
                self.stats.hooked_chunks += 1;
                owned.addr
            }
            None => self.system_chunk(size, align)?,
        };
        Some(OwnedChunk { addr, size })
    }

    fn current_arena(&self) -> u32 {
        self.bindings
            .get(&thread::current().id())
            .copied()
            .unwrap_or(0)
    }
}

/// Simulated arena allocator
pub struct MockAllocator {
    classes: Vec<usize>,
    small_count: usize,
    chunk_size: usize,
    failing: Vec<usize>,
    rejected: Vec<AllocQuery>,
    state: Mutex<State>,
}

impl MockAllocator {
    pub fn builder() -> MockAllocatorBuilder {
        MockAllocatorBuilder::default()
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().stats
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Arena the calling thread allocates from
    pub fn current_arena(&self) -> u32 {
        self.state.lock().current_arena()
    }

    pub fn arena_initialized(&self, arena: u32) -> bool {
        self.state
            .lock()
            .arenas
            .get(arena as usize)
            .is_some_and(|a| a.initialized)
    }

    pub fn arena_hooked(&self, arena: u32) -> bool {
        self.state
            .lock()
            .arenas
            .get(arena as usize)
            .is_some_and(|a| a.hooks.is_some())
    }

    /// Chunks each arena obtained through its hooks
    pub fn hooked_chunks(&self, arena: u32) -> Vec<ChunkSpan> {
        self.state
            .lock()
            .arenas
            .get(arena as usize)
            .map(|a| {
                a.chunks
                    .iter()
                    .map(|c| ChunkSpan { addr: c.addr, size: c.size })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Offer every hooked chunk back through purge, decommit and release
    ///
    /// Chunks whose release is declined stay with the allocator. Returns the
    /// number of chunks actually released.
    pub fn trim(&self) -> usize {
        let mut state = self.state.lock();
        state.stats.trims += 1;

        let mut released = 0;
        for (index, arena) in state.arenas.iter_mut().enumerate() {
            let Some(hooks) = arena.hooks.clone() else {
                continue;
            };
            let index = index as u32;
            arena.chunks.retain(|chunk| {
                let span = ChunkSpan {
                    addr: chunk.addr,
                    size: chunk.size,
                };
                let _ = hooks.purge(span, 0, chunk.size, index);
                let _ = hooks.decommit(span, 0, chunk.size, index);
                match hooks.release(span, true, index) {
                    HookOutcome::Done => {
                        released += 1;
                        false
                    }
                    HookOutcome::Declined => true,
                }
            });
        }
        released
    }

    fn class_of(&self, size: usize) -> Option<usize> {
        self.classes.iter().position(|&c| c >= size)
    }

    fn chunk_for(&self, size: usize) -> usize {
        align_up(size.max(1), self.chunk_size).unwrap_or(usize::MAX)
    }

    fn allocate_small(&self, state: &mut State, arena: u32, class: usize) -> Option<usize> {
        let class_size = self.classes[class];

        let bin = &mut state.arenas[arena as usize].bins[class];
        if let Some(addr) = bin.free.pop() {
            return Some(addr);
        }
        if let Some(run) = bin.run.as_mut() {
            if run.end - run.next >= class_size {
                let addr = run.next;
                run.next += class_size;
                return Some(addr);
            }
        }

        let chunk = state.new_chunk(arena, self.chunk_for(class_size), self.chunk_size)?;
        let bin = &mut state.arenas[arena as usize].bins[class];
        bin.run = Some(Run {
            next: chunk.addr + class_size,
            end: chunk.addr + chunk.size,
        });
        Some(chunk.addr)
    }

    fn allocate_huge(&self, state: &mut State, size: usize) -> Option<OwnedChunk> {
        let needed = self.chunk_for(size);
        if let Some(pos) = state.huge_free.iter().position(|c| c.size >= needed) {
            return Some(state.huge_free.swap_remove(pos));
        }
        // Huge chunks come from the shared pool, served by arena 0's hooks
        state.new_chunk(0, needed, self.chunk_size)
    }
}

impl UnderlyingAllocator for MockAllocator {
    fn query(&self, query: AllocQuery) -> Result<usize, AllocatorError> {
        if self.rejected.contains(&query) {
            return Err(AllocatorError::UnsupportedQuery(query));
        }

        let unsupported = || AllocatorError::UnsupportedQuery(query);
        match query {
            AllocQuery::ArenaCount => Ok(self.state.lock().arenas.len()),
            AllocQuery::SmallClassCount => Ok(self.small_count),
            AllocQuery::LargeClassCount => Ok(self.classes.len() - self.small_count),
            AllocQuery::SmallClassSize(i) => self.classes[..self.small_count]
                .get(i as usize)
                .copied()
                .ok_or_else(unsupported),
            AllocQuery::LargeClassSize(i) => self.classes[self.small_count..]
                .get(i as usize)
                .copied()
                .ok_or_else(unsupported),
        }
    }

    fn bind_current_thread_to_arena(&self, arena: u32) -> Result<(), AllocatorError> {
        let mut state = self.state.lock();
        let slot = state
            .arenas
            .get_mut(arena as usize)
            .ok_or(AllocatorError::NoSuchArena(arena))?;
        slot.initialized = true;

        state.bindings.insert(thread::current().id(), arena);
        state.stats.binds += 1;
        Ok(())
    }

    fn install_chunk_hooks(&self, arena: u32, hooks: Arc<dyn ChunkHooks>) -> Result<(), AllocatorError> {
        let mut state = self.state.lock();
        let slot = state
            .arenas
            .get_mut(arena as usize)
            .ok_or(AllocatorError::NoSuchArena(arena))?;
        if !slot.initialized {
            return Err(AllocatorError::Rejected(format!("arena {} not initialized", arena)));
        }
        slot.hooks = Some(hooks);

        state.stats.hook_installs += 1;
        Ok(())
    }

    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        state.stats.allocations += 1;

        let arena = state.current_arena();
        let (addr, live) = match self.class_of(size) {
            Some(class) => {
                if self.failing.contains(&self.classes[class]) {
                    return None;
                }
                let addr = self.allocate_small(&mut state, arena, class)?;
                (addr, Live::Small { arena, class })
            }
            None => {
                let chunk = self.allocate_huge(&mut state, size)?;
                (chunk.addr, Live::Huge(chunk))
            }
        };

        state.live.insert(addr, live);
        NonNull::new(addr as *mut u8)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) {
        let mut state = self.state.lock();
        state.stats.frees += 1;

        let addr = ptr.as_ptr() as usize;
        match state.live.remove(&addr) {
            Some(Live::Small { arena, class }) => {
                state.arenas[arena as usize].bins[class].free.push(addr);
            }
            Some(Live::Huge(chunk)) => state.huge_free.push(chunk),
            None => log::warn!("mock: free of unknown pointer {:#x}", addr),
        }
    }
}

impl Drop for MockAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for &(addr, layout) in &state.system {
            // SAFETY: allocated by system_chunk() with this layout
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}
