//! Contiguous per-worker slices of the presentation list for data-parallel runs.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

pub const RANK_ENV: &str = "ARCHIVE_FEED_RANK";
pub const WORLD_SIZE_ENV: &str = "ARCHIVE_FEED_WORLD_SIZE";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("world size must be at least 1")]
    EmptyWorld,
    #[error("rank {rank} is out of bounds for world size {world_size}")]
    RankOutOfBounds { rank: usize, world_size: usize },
}

/// Split `total` items into `world_size` contiguous ranges and return the one
/// owned by `rank`.
///
/// The first `total % world_size` ranks get one extra item, so sizes differ
/// by at most one and the ranges tile `0..total` without gaps or overlap.
pub fn allocate(total: usize, world_size: usize, rank: usize) -> Result<Range<usize>, PartitionError> {
    if world_size == 0 {
        return Err(PartitionError::EmptyWorld);
    }
    if rank >= world_size {
        return Err(PartitionError::RankOutOfBounds { rank, world_size });
    }
    let base = total / world_size;
    let extra = total % world_size;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    Ok(start..start + len)
}

/// This process's place among the data-parallel workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPartition {
    pub rank: usize,
    pub world_size: usize,
}

impl WorkerPartition {
    pub fn new(rank: usize, world_size: usize) -> Result<Self, PartitionError> {
        allocate(0, world_size, rank)?;
        Ok(Self { rank, world_size })
    }

    /// Read `ARCHIVE_FEED_RANK` / `ARCHIVE_FEED_WORLD_SIZE`; `None` unless both
    /// parse.
    pub fn from_env() -> Option<Self> {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.trim().parse().ok()
        }
        let rank = parse_usize(RANK_ENV)?;
        let world_size = parse_usize(WORLD_SIZE_ENV)?;
        Self::new(rank, world_size).ok()
    }

    pub fn range(&self, total: usize) -> Result<Range<usize>, PartitionError> {
        allocate(total, self.world_size, self.rank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_items_over_three_workers() {
        assert_eq!(allocate(10, 3, 0).unwrap(), 0..4);
        assert_eq!(allocate(10, 3, 1).unwrap(), 4..7);
        assert_eq!(allocate(10, 3, 2).unwrap(), 7..10);
    }

    #[test]
    fn ranges_tile_exactly_once() {
        for total in 0..40 {
            for world in 1..9 {
                let mut hits = vec![0u32; total];
                let mut next = 0;
                for rank in 0..world {
                    let r = allocate(total, world, rank).unwrap();
                    assert_eq!(r.start, next, "gap before rank {rank}");
                    let expected = if rank < total % world {
                        total.div_ceil(world)
                    } else {
                        total / world
                    };
                    assert_eq!(r.len(), expected);
                    for i in r.clone() {
                        hits[i] += 1;
                    }
                    next = r.end;
                }
                assert_eq!(next, total);
                assert!(hits.iter().all(|h| *h == 1));
            }
        }
    }

    #[test]
    fn more_workers_than_items_gives_empty_tails() {
        assert_eq!(allocate(2, 4, 1).unwrap(), 1..2);
        assert!(allocate(2, 4, 3).unwrap().is_empty());
    }

    #[test]
    fn invalid_world_rejected() {
        assert_eq!(allocate(5, 0, 0), Err(PartitionError::EmptyWorld));
        assert_eq!(
            WorkerPartition::new(3, 3),
            Err(PartitionError::RankOutOfBounds {
                rank: 3,
                world_size: 3
            })
        );
    }
}
