use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Separator between the category name and the image identifier in a flat id.
pub const FLAT_SEPARATOR: char = '/';

/// Build a flat `"category/identifier"` key.
pub fn flat_id(category: &str, image_id: &str) -> String {
    format!("{category}{FLAT_SEPARATOR}{image_id}")
}

/// Split a flat key into `(category, identifier)`.
///
/// Identifiers never contain the separator, so the split happens at the last
/// separator and category names may themselves contain `/`.
pub fn split_flat_id(flat: &str) -> Option<(&str, &str)> {
    let (category, image_id) = flat.rsplit_once(FLAT_SEPARATOR)?;
    if category.is_empty() || image_id.is_empty() {
        return None;
    }
    Some((category, image_id))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{list} lists {got} categories but the category file has {expected}")]
    CategoryCount {
        list: SplitList,
        expected: usize,
        got: usize,
    },
    #[error("duplicate category name {0:?}")]
    DuplicateCategory(String),
    #[error("empty category name at index {0}")]
    EmptyCategory(usize),
    #[error("{list}[{index}] holds malformed flat id {flat:?}")]
    MalformedFlatId {
        list: SplitList,
        index: usize,
        flat: String,
    },
    #[error("{list}[{index}] holds {flat:?} which belongs to another category than {category:?}")]
    ForeignCategory {
        list: SplitList,
        index: usize,
        category: String,
        flat: String,
    },
    #[error("{flat:?} appears in both the train and test lists")]
    Overlap { flat: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitList {
    Train,
    Test,
}

impl SplitList {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitList::Train => "train",
            SplitList::Test => "test",
        }
    }
}

impl std::fmt::Display for SplitList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the three JSON documents that freeze one split.
///
/// `<name>_cats.json`, `<name>_ntest<k>_tst.json`, `<name>_ntest<k>_trn.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitFileSet {
    pub dir: PathBuf,
    pub name: String,
    /// Held-out images per category the split was drawn with.
    pub ntest: usize,
}

impl SplitFileSet {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, ntest: usize) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            ntest,
        }
    }

    pub fn cats_path(&self) -> PathBuf {
        self.dir.join(format!("{}_cats.json", self.name))
    }

    pub fn test_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_ntest{}_tst.json", self.name, self.ntest))
    }

    pub fn train_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}_ntest{}_trn.json", self.name, self.ntest))
    }

    pub fn paths(&self) -> [PathBuf; 3] {
        [self.cats_path(), self.test_path(), self.train_path()]
    }

    /// True when every document of the set exists on disk.
    pub fn is_complete(&self) -> bool {
        self.paths().iter().all(|p| Path::new(p).is_file())
    }
}

/// In-memory form of a frozen split: category list plus nested flat ids,
/// outer index = category index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSplit {
    pub cats: Vec<String>,
    pub test: Vec<Vec<String>>,
    pub train: Vec<Vec<String>>,
}

impl PersistedSplit {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut seen = HashSet::with_capacity(self.cats.len());
        for (i, name) in self.cats.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyCategory(i));
            }
            if !seen.insert(name.as_str()) {
                return Err(ValidationError::DuplicateCategory(name.clone()));
            }
        }
        for (list, nested) in [(SplitList::Test, &self.test), (SplitList::Train, &self.train)] {
            if nested.len() != self.cats.len() {
                return Err(ValidationError::CategoryCount {
                    list,
                    expected: self.cats.len(),
                    got: nested.len(),
                });
            }
            for (index, (category, flats)) in self.cats.iter().zip(nested).enumerate() {
                for flat in flats {
                    let Some((owner, _)) = split_flat_id(flat) else {
                        return Err(ValidationError::MalformedFlatId {
                            list,
                            index,
                            flat: flat.clone(),
                        });
                    };
                    if owner != category {
                        return Err(ValidationError::ForeignCategory {
                            list,
                            index,
                            category: category.clone(),
                            flat: flat.clone(),
                        });
                    }
                }
            }
        }
        for (test, train) in self.test.iter().zip(&self.train) {
            let held_out: HashSet<&str> = test.iter().map(String::as_str).collect();
            if let Some(flat) = train.iter().find(|f| held_out.contains(f.as_str())) {
                return Err(ValidationError::Overlap { flat: flat.clone() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_cats() -> PersistedSplit {
        PersistedSplit {
            cats: vec!["cat".into(), "dog".into()],
            test: vec![vec!["cat/0_00001".into()], vec![]],
            train: vec![vec!["cat/0_00000".into()], vec!["dog/0_00002".into()]],
        }
    }

    #[test]
    fn flat_ids_split_at_last_separator() {
        assert_eq!(split_flat_id("a/b/1_00002"), Some(("a/b", "1_00002")));
        assert_eq!(split_flat_id("nosep"), None);
        assert_eq!(split_flat_id("/0_00000"), None);
        assert_eq!(flat_id("cat", "0_00003"), "cat/0_00003");
    }

    #[test]
    fn file_names_follow_ntest_convention() {
        let files = SplitFileSet::new("/tmp/splits", "objrec", 5);
        assert!(files.cats_path().ends_with("objrec_cats.json"));
        assert!(files.test_path().ends_with("objrec_ntest5_tst.json"));
        assert!(files.train_path().ends_with("objrec_ntest5_trn.json"));
    }

    #[test]
    fn consistent_split_passes() {
        assert!(two_cats().validate().is_ok());
    }

    #[test]
    fn category_count_mismatch_rejected() {
        let mut split = two_cats();
        split.train.pop();
        let err = split.validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::CategoryCount {
                list: SplitList::Train,
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn foreign_category_rejected() {
        let mut split = two_cats();
        split.train[1].push("cat/0_00009".into());
        assert!(matches!(
            split.validate(),
            Err(ValidationError::ForeignCategory { index: 1, .. })
        ));
    }

    #[test]
    fn overlap_rejected() {
        let mut split = two_cats();
        split.train[0].push("cat/0_00001".into());
        assert!(matches!(split.validate(), Err(ValidationError::Overlap { .. })));
    }

    #[test]
    fn json_shape_is_array_of_arrays() {
        let split = two_cats();
        let tst = serde_json::to_string(&split.test).unwrap();
        assert_eq!(tst, r#"[["cat/0_00001"],[]]"#);
    }
}
