//! Shared data contracts for persisted splits and corpus summaries.

pub mod split;
pub mod summary;

pub use split::{flat_id, split_flat_id, PersistedSplit, SplitFileSet, SplitList, ValidationError};
pub use summary::{BatchSummary, CategoryCounts, CorpusSummary};
