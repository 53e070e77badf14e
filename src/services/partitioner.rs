//! Coordinator-free work splitting for batch workers.
//!
//! Round-robin: item `i` belongs to shard `i % task_count`. Every worker
//! recomputes its own shard from the same ordered list, so shard sizes differ
//! by at most one and the shards never overlap.

use crate::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard<T> {
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Shard<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn validate(task_count: usize, task_index: usize) -> Result<(), ConfigError> {
    if task_count < 1 {
        return Err(ConfigError::InvalidTaskCount(task_count));
    }
    if task_index >= task_count {
        return Err(ConfigError::TaskIndexOutOfRange {
            index: task_index,
            count: task_count,
        });
    }
    Ok(())
}

pub fn partition<T: Clone>(
    items: &[T],
    task_count: usize,
    task_index: usize,
) -> Result<Shard<T>, ConfigError> {
    validate(task_count, task_index)?;
    let items = items
        .iter()
        .skip(task_index)
        .step_by(task_count)
        .cloned()
        .collect();
    Ok(Shard {
        index: task_index,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_shards(len: usize, task_count: usize) -> Vec<Shard<usize>> {
        let items: Vec<usize> = (0..len).collect();
        (0..task_count)
            .map(|i| partition(&items, task_count, i).unwrap())
            .collect()
    }

    #[test]
    fn shards_cover_every_item_exactly_once() {
        for len in [0, 1, 2, 7, 10, 99, 100, 101] {
            for task_count in [1, 2, 3, 10, 150] {
                let shards = all_shards(len, task_count);
                let mut seen: Vec<usize> = shards.iter().flat_map(|s| s.items.clone()).collect();
                seen.sort_unstable();
                assert_eq!(seen, (0..len).collect::<Vec<_>>(), "len={len} count={task_count}");

                let sizes: Vec<usize> = shards.iter().map(Shard::len).collect();
                let max = *sizes.iter().max().unwrap();
                let min = *sizes.iter().min().unwrap();
                assert!(max - min <= 1, "len={len} count={task_count} sizes={sizes:?}");
            }
        }
    }

    #[test]
    fn single_task_gets_everything() {
        let items = vec!["a", "b", "c"];
        let shard = partition(&items, 1, 0).unwrap();
        assert_eq!(shard.items, items);
        assert_eq!(shard.index, 0);
    }

    #[test]
    fn round_robin_assignment() {
        let items: Vec<u32> = (0..7).collect();
        assert_eq!(partition(&items, 3, 0).unwrap().items, vec![0, 3, 6]);
        assert_eq!(partition(&items, 3, 1).unwrap().items, vec![1, 4]);
        assert_eq!(partition(&items, 3, 2).unwrap().items, vec![2, 5]);
    }

    #[test]
    fn more_tasks_than_items_leaves_trailing_shards_empty() {
        let items = vec![1, 2];
        assert_eq!(partition(&items, 5, 1).unwrap().items, vec![2]);
        assert!(partition(&items, 5, 2).unwrap().is_empty());
        assert!(partition(&items, 5, 4).unwrap().is_empty());
    }

    #[test]
    fn thousand_items_over_ten_tasks() {
        for shard in all_shards(1000, 10) {
            assert_eq!(shard.len(), 100);
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        let items = vec![1, 2, 3];
        assert_eq!(
            partition(&items, 0, 0),
            Err(ConfigError::InvalidTaskCount(0))
        );
        assert_eq!(
            partition(&items, 3, 3),
            Err(ConfigError::TaskIndexOutOfRange { index: 3, count: 3 })
        );
    }
}
