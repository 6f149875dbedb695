use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-source-file load outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub source: PathBuf,
    pub records: usize,
    pub held_out: bool,
    /// False when the file was missing or unreadable and the slot stayed empty.
    pub loaded: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCounts {
    pub name: String,
    pub all: usize,
    pub train: usize,
    pub test: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusSummary {
    pub batches: Vec<BatchSummary>,
    pub categories: Vec<CategoryCounts>,
    pub totals: CategoryCounts,
}

impl CorpusSummary {
    pub fn new(batches: Vec<BatchSummary>, categories: Vec<CategoryCounts>) -> Self {
        let mut totals = CategoryCounts {
            name: "total".to_string(),
            ..Default::default()
        };
        for c in &categories {
            totals.all += c.all;
            totals.train += c.train;
            totals.test += c.test;
        }
        Self {
            batches,
            categories,
            totals,
        }
    }

    pub fn missing_batches(&self) -> impl Iterator<Item = &BatchSummary> {
        self.batches.iter().filter(|b| !b.loaded)
    }

    /// Categories that ended up with no images at all.
    pub fn empty_categories(&self) -> impl Iterator<Item = &str> {
        self.categories
            .iter()
            .filter(|c| c.all == 0)
            .map(|c| c.name.as_str())
    }
}
