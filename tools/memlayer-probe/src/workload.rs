//! Multi-threaded allocation workload
//!
//! Each thread binds to arena `t % narenas`, allocates a deterministic spread
//! of sizes, checks every address against the shared heap, then frees them.

use crate::config::WorkloadConfig;
use memlayer::mock::MockAllocator;
use memlayer::{SharedHeap, UnderlyingAllocator};

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkloadReport {
    pub allocations: usize,
    /// Allocation requests the allocator could not satisfy
    pub out_of_memory: usize,
    /// Addresses outside the shared heap
    pub escaped: usize,
}

impl WorkloadReport {
    fn merge(mut self, other: WorkloadReport) -> Self {
        self.allocations += other.allocations;
        self.out_of_memory += other.out_of_memory;
        self.escaped += other.escaped;
        self
    }
}

/// Size of allocation `i` on thread `t`, in `1..=max_size`
fn request_size(t: usize, i: usize, max_size: usize) -> usize {
    1 + (i.wrapping_mul(2654435761).wrapping_add(t * 97)) % max_size
}

pub fn run(
    allocator: &MockAllocator,
    heap: Option<&SharedHeap>,
    narenas: u32,
    config: &WorkloadConfig,
) -> anyhow::Result<WorkloadReport> {
    let reports = crossbeam::scope(|s| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                s.spawn(move |_| -> anyhow::Result<WorkloadReport> {
                    let arena = (t as u32) % narenas.max(1);
                    allocator.bind_current_thread_to_arena(arena)?;

                    let mut report = WorkloadReport::default();
                    let mut live = Vec::with_capacity(config.allocations_per_thread);
                    for i in 0..config.allocations_per_thread {
                        let size = request_size(t, i, config.max_size);
                        report.allocations += 1;
                        match allocator.allocate(size) {
                            Some(ptr) => {
                                let addr = ptr.as_ptr() as usize;
                                if heap.is_some_and(|heap| !heap.contains(addr)) {
                                    log::error!(
                                        "thread {}: {} bytes at {:#x} outside the shared heap",
                                        t,
                                        size,
                                        addr
                                    );
                                    report.escaped += 1;
                                }
                                live.push(ptr);
                            }
                            None => report.out_of_memory += 1,
                        }
                    }

                    for ptr in live {
                        // SAFETY: allocated above and freed once
                        unsafe { allocator.free(ptr) };
                    }
                    Ok(report)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow::anyhow!("workload thread panicked"))?)
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .map_err(|_| anyhow::anyhow!("workload scope panicked"))??;

    Ok(reports.into_iter().fold(WorkloadReport::default(), WorkloadReport::merge))
}
