//! Probe configuration
//!
//! ```toml
//! [heap]
//! size = 67108864
//! alignment = 65536
//! standalone = false
//!
//! [allocator]
//! arenas = 4
//! chunk_size = 65536
//! bootstrap_slots = [[4096, 8], [64, 32]]
//!
//! [workload]
//! threads = 4
//! allocations_per_thread = 1000
//! max_size = 40000
//! ```
//!
//! Every field is optional.

use anyhow::{Context, Result};
use memlayer::mock::{MockAllocator, DEFAULT_CHUNK_SIZE, DEFAULT_LARGE_CLASSES, DEFAULT_SMALL_CLASSES};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub heap: HeapConfig,
    pub allocator: AllocatorConfig,
    pub workload: WorkloadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeapConfig {
    #[serde(default = "default_heap_size")]
    pub size: usize,
    #[serde(default = "default_heap_alignment")]
    pub alignment: usize,
    /// Skip the shared heap entirely
    #[serde(default)]
    pub standalone: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            size: default_heap_size(),
            alignment: default_heap_alignment(),
            standalone: false,
        }
    }
}

fn default_heap_size() -> usize {
    64 * 1024 * 1024
}

fn default_heap_alignment() -> usize {
    DEFAULT_CHUNK_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllocatorConfig {
    #[serde(default = "default_arenas")]
    pub arenas: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_small_classes")]
    pub small_classes: Vec<usize>,
    #[serde(default = "default_large_classes")]
    pub large_classes: Vec<usize>,
    /// `[class_size, slots]` pairs of pre-hook memory in arena 0
    #[serde(default)]
    pub bootstrap_slots: Vec<(usize, usize)>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            arenas: default_arenas(),
            chunk_size: default_chunk_size(),
            small_classes: default_small_classes(),
            large_classes: default_large_classes(),
            bootstrap_slots: Vec::new(),
        }
    }
}

fn default_arenas() -> u32 {
    4
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_small_classes() -> Vec<usize> {
    DEFAULT_SMALL_CLASSES.to_vec()
}

fn default_large_classes() -> Vec<usize> {
    DEFAULT_LARGE_CLASSES.to_vec()
}

impl AllocatorConfig {
    pub fn build(&self) -> MockAllocator {
        self.bootstrap_slots
            .iter()
            .fold(
                MockAllocator::builder()
                    .arenas(self.arenas)
                    .chunk_size(self.chunk_size)
                    .small_classes(&self.small_classes)
                    .large_classes(&self.large_classes),
                |builder, &(class_size, slots)| builder.bootstrap_slots(class_size, slots),
            )
            .build()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_allocations")]
    pub allocations_per_thread: usize,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            allocations_per_thread: default_allocations(),
            max_size: default_max_size(),
        }
    }
}

fn default_threads() -> usize {
    4
}

fn default_allocations() -> usize {
    1000
}

fn default_max_size() -> usize {
    40_000
}

impl ProbeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid probe configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.heap.standalone && self.heap.size == 0 {
            anyhow::bail!("heap.size must be non-zero unless heap.standalone is set");
        }
        if !self.heap.alignment.is_power_of_two() {
            anyhow::bail!("heap.alignment {} is not a power of two", self.heap.alignment);
        }
        if self.allocator.arenas == 0 {
            anyhow::bail!("allocator.arenas must be at least 1");
        }
        if self.workload.max_size == 0 {
            anyhow::bail!("workload.max_size must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = ProbeConfig::from_toml("").unwrap();
        assert_eq!(config.heap.size, 64 * 1024 * 1024);
        assert!(!config.heap.standalone);
        assert_eq!(config.allocator.arenas, 4);
        assert_eq!(config.allocator.small_classes, DEFAULT_SMALL_CLASSES);
        assert_eq!(config.workload.threads, 4);
    }

    #[test]
    fn test_partial_sections() {
        let config = ProbeConfig::from_toml(
            r#"
            [heap]
            size = 1048576

            [allocator]
            arenas = 2
            bootstrap_slots = [[4096, 8]]
            "#,
        )
        .unwrap();
        assert_eq!(config.heap.size, 1 << 20);
        assert_eq!(config.heap.alignment, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.allocator.arenas, 2);
        assert_eq!(config.allocator.bootstrap_slots, vec![(4096, 8)]);
        assert_eq!(config.workload.allocations_per_thread, 1000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ProbeConfig::from_toml("[heap]\nsize = 0").is_err());
        assert!(ProbeConfig::from_toml("[heap]\nalignment = 3000").is_err());
        assert!(ProbeConfig::from_toml("[allocator]\narenas = 0").is_err());
        assert!(ProbeConfig::from_toml("[heap]\nsize = \"big\"").is_err());
    }

    #[test]
    fn test_standalone_allows_zero_size() {
        let config = ProbeConfig::from_toml("[heap]\nsize = 0\nstandalone = true").unwrap();
        assert!(config.heap.standalone);
    }
}
