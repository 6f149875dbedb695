//! Category names and the per-category All/Train/Test identifier lists.

use crate::archive::Corpus;
use crate::types::{DatasetError, DatasetResult, ImageId, SplitKind};
use data_contracts::{flat_id, split_flat_id, CategoryCounts, CorpusSummary};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Nested identifier lists, outer index = category index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitLists {
    pub all: Vec<Vec<ImageId>>,
    pub train: Vec<Vec<ImageId>>,
    pub test: Vec<Vec<ImageId>>,
}

impl SplitLists {
    pub fn get(&self, split: SplitKind) -> &[Vec<ImageId>] {
        match split {
            SplitKind::All => &self.all,
            SplitKind::Train => &self.train,
            SplitKind::Test => &self.test,
        }
    }
}

/// `"category/identifier"` projections of [`SplitLists`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatLists {
    pub all: Vec<String>,
    pub train: Vec<String>,
    pub test: Vec<String>,
}

impl FlatLists {
    pub fn get(&self, split: SplitKind) -> &[String] {
        match split {
            SplitKind::All => &self.all,
            SplitKind::Train => &self.train,
            SplitKind::Test => &self.test,
        }
    }
}

/// Category list, name lookup, split lists and their flat projections.
///
/// All of them are only ever rebuilt together, so every list stays co-indexed
/// with `names`.
#[derive(Debug, Clone, Default)]
pub struct CategorySet {
    names: Vec<String>,
    index: HashMap<String, usize>,
    lists: SplitLists,
    flat: FlatLists,
}

impl CategorySet {
    /// Scan every record once and file it under its label, in Train or Test
    /// depending on whether its batch is held out.
    pub fn build_from_archive(corpus: &Corpus) -> DatasetResult<Self> {
        let names = corpus.category_names().to_vec();
        if let Some(dup) = first_duplicate(&names) {
            return Err(DatasetError::Format {
                path: corpus
                    .buffers()
                    .first()
                    .map(|b| b.source().to_path_buf())
                    .unwrap_or_default(),
                msg: format!("category {dup:?} is listed more than once"),
            });
        }
        let n = names.len();
        let mut lists = SplitLists {
            all: vec![Vec::new(); n],
            train: vec![Vec::new(); n],
            test: vec![Vec::new(); n],
        };
        for (batch, buffer) in corpus.buffers().iter().enumerate() {
            for index in 0..buffer.records() {
                let id = ImageId { batch, index };
                let label = corpus.label(id)? as usize;
                if label >= n {
                    return Err(DatasetError::Format {
                        path: buffer.source().to_path_buf(),
                        msg: format!("record {id} has label {label} but only {n} categories"),
                    });
                }
                lists.all[label].push(id);
                if buffer.is_held_out() {
                    lists.test[label].push(id);
                } else {
                    lists.train[label].push(id);
                }
            }
        }
        Ok(Self::from_lists(names, lists))
    }

    /// Assemble from names plus Train/Test, re-deriving All as their union in
    /// archive order.
    pub fn from_split(
        names: Vec<String>,
        train: Vec<Vec<ImageId>>,
        test: Vec<Vec<ImageId>>,
    ) -> DatasetResult<Self> {
        if train.len() != names.len() || test.len() != names.len() {
            return Err(DatasetError::SplitConsistency(format!(
                "{} categories but {} train and {} test lists",
                names.len(),
                train.len(),
                test.len()
            )));
        }
        if let Some(dup) = first_duplicate(&names) {
            return Err(DatasetError::SplitConsistency(format!(
                "duplicate category {dup:?}"
            )));
        }
        let mut lists = SplitLists {
            all: Vec::with_capacity(names.len()),
            train,
            test,
        };
        for c in 0..names.len() {
            lists.train[c].sort_unstable();
            lists.test[c].sort_unstable();
            let mut all: Vec<ImageId> = lists.train[c].iter().chain(&lists.test[c]).copied().collect();
            all.sort_unstable();
            let before = all.len();
            all.dedup();
            if all.len() != before {
                return Err(DatasetError::SplitConsistency(format!(
                    "category {:?} has images in both train and test",
                    names[c]
                )));
            }
            lists.all.push(all);
        }
        Ok(Self::from_lists(names, lists))
    }

    fn from_lists(names: Vec<String>, lists: SplitLists) -> Self {
        let mut set = Self {
            names,
            index: HashMap::new(),
            lists,
            flat: FlatLists::default(),
        };
        set.rebuild();
        set
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn lists(&self) -> &SplitLists {
        &self.lists
    }

    pub fn ids(&self, split: SplitKind) -> &[Vec<ImageId>] {
        self.lists.get(split)
    }

    pub fn flat(&self, split: SplitKind) -> &[String] {
        self.flat.get(split)
    }

    pub fn flat_lists(&self) -> &FlatLists {
        &self.flat
    }

    /// Category index and identifier of position `i` in the flat list of
    /// `split`.
    pub fn entry(&self, split: SplitKind, mut i: usize) -> Option<(usize, ImageId)> {
        for (c, ids) in self.lists.get(split).iter().enumerate() {
            if i < ids.len() {
                return Some((c, ids[i]));
            }
            i -= ids.len();
        }
        None
    }

    /// Keep only the named categories, preserving the existing order.
    pub fn select_categories<S: AsRef<str>>(&mut self, keep: &[S]) {
        let keep: HashSet<&str> = keep.iter().map(|s| s.as_ref()).collect();
        for name in &keep {
            if !self.index.contains_key(*name) {
                tracing::debug!(category = %name, "select_categories: unknown category ignored");
            }
        }
        self.retain(|name| keep.contains(name));
    }

    /// Remove the named categories.
    pub fn delete_categories<S: AsRef<str>>(&mut self, drop: &[S]) {
        let drop: HashSet<&str> = drop.iter().map(|s| s.as_ref()).collect();
        for name in &drop {
            if !self.index.contains_key(*name) {
                tracing::debug!(category = %name, "delete_categories: unknown category ignored");
            }
        }
        self.retain(|name| !drop.contains(name));
    }

    fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let before = self.names.len();
        let names = std::mem::take(&mut self.names);
        let old = std::mem::take(&mut self.lists);
        let mut lists = SplitLists::default();
        for (((name, all), train), test) in names
            .into_iter()
            .zip(old.all)
            .zip(old.train)
            .zip(old.test)
        {
            if keep(name.as_str()) {
                self.names.push(name);
                lists.all.push(all);
                lists.train.push(train);
                lists.test.push(test);
            }
        }
        self.lists = lists;
        self.rebuild();
        tracing::info!(before, after = self.names.len(), "categories curated");
    }

    /// Re-draw the held-out split: `ntest` random images per category go to
    /// Test (all of them when the category is smaller), the rest to Train.
    pub fn resplit_per_category<R: Rng + ?Sized>(&mut self, ntest: usize, rng: &mut R) {
        for c in 0..self.names.len() {
            let mut shuffled = self.lists.all[c].clone();
            shuffled.shuffle(rng);
            let k = ntest.min(shuffled.len());
            let mut train = shuffled.split_off(k);
            shuffled.sort_unstable();
            train.sort_unstable();
            self.lists.test[c] = shuffled;
            self.lists.train[c] = train;
        }
        self.rebuild();
    }

    /// Project the nested lists to flat `"category/identifier"` sequences.
    pub fn flatten(&self) -> FlatLists {
        let project = |nested: &[Vec<ImageId>]| -> Vec<String> {
            self.names
                .iter()
                .zip(nested)
                .flat_map(|(name, ids)| ids.iter().map(move |id| flat_id(name, &id.to_string())))
                .collect()
        };
        FlatLists {
            all: project(&self.lists.all),
            train: project(&self.lists.train),
            test: project(&self.lists.test),
        }
    }

    /// Inverse of [`flatten`](Self::flatten): regroup flat ids under the
    /// categories of this set.
    pub fn unflatten(&self, flat: &FlatLists) -> DatasetResult<SplitLists> {
        Ok(SplitLists {
            all: self.group(&flat.all)?,
            train: self.group(&flat.train)?,
            test: self.group(&flat.test)?,
        })
    }

    fn group(&self, flat: &[String]) -> DatasetResult<Vec<Vec<ImageId>>> {
        let mut nested = vec![Vec::new(); self.names.len()];
        for entry in flat {
            let (category, id) = split_flat_id(entry)
                .ok_or_else(|| DatasetError::BadIdentifier(entry.clone()))?;
            let c = self.index_of(category).ok_or_else(|| {
                DatasetError::SplitConsistency(format!("{entry:?} names an unknown category"))
            })?;
            nested[c].push(id.parse()?);
        }
        Ok(nested)
    }

    /// Every identifier must address a record of `corpus`.
    pub fn check_within(&self, corpus: &Corpus) -> DatasetResult<()> {
        for (name, ids) in self.names.iter().zip(&self.lists.all) {
            if let Some(id) = ids.iter().find(|id| id.index >= corpus.records(id.batch)) {
                return Err(DatasetError::SplitConsistency(format!(
                    "{} is not in the loaded archive",
                    flat_id(name, &id.to_string())
                )));
            }
        }
        Ok(())
    }

    pub fn counts(&self) -> Vec<CategoryCounts> {
        self.names
            .iter()
            .enumerate()
            .map(|(c, name)| CategoryCounts {
                name: name.clone(),
                all: self.lists.all[c].len(),
                train: self.lists.train[c].len(),
                test: self.lists.test[c].len(),
            })
            .collect()
    }

    /// Per-batch and per-category counts for `corpus` under this split.
    pub fn summary(&self, corpus: &Corpus) -> CorpusSummary {
        let summary = CorpusSummary::new(corpus.batch_summaries(), self.counts());
        for batch in summary.missing_batches() {
            tracing::warn!(path = %batch.source.display(), "batch missing from corpus");
        }
        for name in summary.empty_categories() {
            tracing::warn!(category = name, "category has no images");
        }
        summary
    }

    fn rebuild(&mut self) {
        self.index = self
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        self.flat = self.flatten();
        self.assert_consistent();
    }

    fn assert_consistent(&self) {
        let n = self.names.len();
        assert_eq!(self.index.len(), n, "category names must be unique");
        assert!(
            self.lists.all.len() == n && self.lists.train.len() == n && self.lists.test.len() == n,
            "split lists out of step with the category list"
        );
        debug_assert!((0..n).all(|c| {
            let all: HashSet<&ImageId> = self.lists.all[c].iter().collect();
            let test: HashSet<&ImageId> = self.lists.test[c].iter().collect();
            self.lists.train[c]
                .iter()
                .all(|id| all.contains(id) && !test.contains(id))
                && self.lists.test[c].iter().all(|id| all.contains(id))
        }));
    }
}

fn first_duplicate(names: &[String]) -> Option<&String> {
    let mut seen = HashSet::with_capacity(names.len());
    names.iter().find(|n| !seen.insert(n.as_str()))
}
