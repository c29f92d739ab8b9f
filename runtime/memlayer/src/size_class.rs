//! Size-Class Table - Small and large object classes of the allocator
//!
//! Recomputed on demand from typed queries and used only by the bootstrap
//! drain. Huge objects (above the largest large class) are not listed.

use crate::allocator::{AllocQuery, UnderlyingAllocator};
use crate::{MemLayerError, Result};

/// Ordered class sizes: small classes first, then large classes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClassTable {
    sizes: Vec<usize>,
    small: usize,
}

impl SizeClassTable {
    /// Build a table from explicit sizes
    pub fn new(small: Vec<usize>, large: Vec<usize>) -> Self {
        let split = small.len();
        let mut sizes = small;
        sizes.extend(large);
        Self { sizes, small: split }
    }

    /// Read every small and large class size from the allocator
    ///
    /// # Errors
    /// `QueryFailed` naming the first query the allocator could not answer.
    pub fn query(allocator: &dyn UnderlyingAllocator) -> Result<Self> {
        let small_count = query(allocator, AllocQuery::SmallClassCount)?;
        let large_count = query(allocator, AllocQuery::LargeClassCount)?;

        let small = (0..small_count)
            .map(|i| query(allocator, AllocQuery::SmallClassSize(class_index(i)?)))
            .collect::<Result<Vec<_>>>()?;
        let large = (0..large_count)
            .map(|i| query(allocator, AllocQuery::LargeClassSize(class_index(i)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(small, large))
    }

    /// Total number of classes
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn small(&self) -> &[usize] {
        &self.sizes[..self.small]
    }

    pub fn large(&self) -> &[usize] {
        &self.sizes[self.small..]
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Classes from the last (largest) to the first (smallest)
    pub fn largest_first(&self) -> impl Iterator<Item = usize> + '_ {
        self.sizes.iter().rev().copied()
    }
}

pub(crate) fn query(allocator: &dyn UnderlyingAllocator, query: AllocQuery) -> Result<usize> {
    allocator
        .query(query)
        .map_err(|source| MemLayerError::QueryFailed { query, source })
}

fn class_index(i: usize) -> Result<u32> {
    u32::try_from(i).map_err(|_| MemLayerError::ClassIndexOverflow { index: i })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order() {
        let table = SizeClassTable::new(vec![8, 16, 32], vec![4096, 8192]);
        assert_eq!(table.len(), 5);
        assert_eq!(table.small(), &[8, 16, 32]);
        assert_eq!(table.large(), &[4096, 8192]);
        assert_eq!(table.largest_first().collect::<Vec<_>>(), vec![8192, 4096, 32, 16, 8]);
    }

    #[test]
    fn test_empty_table() {
        let table = SizeClassTable::new(Vec::new(), Vec::new());
        assert!(table.is_empty());
        assert_eq!(table.largest_first().count(), 0);
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_query_from_allocator() {
        use crate::mock::MockAllocator;

        let allocator = MockAllocator::builder()
            .small_classes(&[16, 32])
            .large_classes(&[4096])
            .build();
        let table = SizeClassTable::query(&allocator).unwrap();
        assert_eq!(table.sizes(), &[16, 32, 4096]);
    }

    #[cfg(feature = "mock")]
    #[test]
    fn test_query_failure() {
        use crate::mock::MockAllocator;

        let allocator = MockAllocator::builder()
            .reject_query(AllocQuery::LargeClassCount)
            .build();
        let err = SizeClassTable::query(&allocator).unwrap_err();
        assert!(matches!(
            err,
            MemLayerError::QueryFailed { query: AllocQuery::LargeClassCount, .. }
        ));
    }
}
