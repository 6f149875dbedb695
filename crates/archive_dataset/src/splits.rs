//! Freezing a train/test split to JSON and reloading it.

use crate::categories::CategorySet;
use crate::types::{DatasetError, DatasetResult, ImageId};
use data_contracts::{split_flat_id, PersistedSplit, SplitFileSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

impl CategorySet {
    /// The category list plus nested Test/Train flat ids. All is left out; it
    /// is re-derived on restore.
    pub fn to_persisted(&self) -> PersistedSplit {
        let flat = self.flatten();
        let regroup = |flats: &[String], nested: &[Vec<ImageId>]| -> Vec<Vec<String>> {
            let mut it = flats.iter().cloned();
            nested
                .iter()
                .map(|ids| it.by_ref().take(ids.len()).collect())
                .collect()
        };
        PersistedSplit {
            cats: self.names().to_vec(),
            test: regroup(&flat.test, &self.lists().test),
            train: regroup(&flat.train, &self.lists().train),
        }
    }

    pub fn from_persisted(split: PersistedSplit) -> DatasetResult<Self> {
        split.validate()?;
        let parse = |nested: Vec<Vec<String>>| -> DatasetResult<Vec<Vec<ImageId>>> {
            nested
                .into_iter()
                .map(|flats| {
                    flats
                        .iter()
                        .map(|flat| {
                            let (_, id) = split_flat_id(flat)
                                .ok_or_else(|| DatasetError::BadIdentifier(flat.clone()))?;
                            id.parse()
                        })
                        .collect::<DatasetResult<Vec<ImageId>>>()
                })
                .collect()
        };
        let train = parse(split.train)?;
        let test = parse(split.test)?;
        CategorySet::from_split(split.cats, train, test)
    }

    /// Write `<name>_cats.json`, `<name>_ntest<k>_tst.json` and
    /// `<name>_ntest<k>_trn.json`.
    pub fn save(&self, files: &SplitFileSet) -> DatasetResult<()> {
        if !files.dir.exists() {
            fs::create_dir_all(&files.dir).map_err(|e| DatasetError::Io {
                path: files.dir.clone(),
                source: e,
            })?;
        }
        let split = self.to_persisted();
        write_json(&files.cats_path(), &split.cats)?;
        write_json(&files.test_path(), &split.test)?;
        write_json(&files.train_path(), &split.train)?;
        tracing::info!(
            dir = %files.dir.display(),
            name = %files.name,
            ntest = files.ntest,
            categories = split.cats.len(),
            "split saved"
        );
        Ok(())
    }

    /// Reload a frozen split. Every file must exist and agree on the category
    /// count; nothing is returned unless the whole set is consistent.
    pub fn restore(files: &SplitFileSet) -> DatasetResult<Self> {
        let cats: Vec<String> = read_json(&files.cats_path())?;
        let test: Vec<Vec<String>> = read_json(&files.test_path())?;
        let train: Vec<Vec<String>> = read_json(&files.train_path())?;
        let set = Self::from_persisted(PersistedSplit { cats, test, train })?;
        tracing::info!(
            dir = %files.dir.display(),
            name = %files.name,
            ntest = files.ntest,
            categories = set.len(),
            "split restored"
        );
        Ok(set)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> DatasetResult<()> {
    let data = serde_json::to_vec(value).map_err(|e| DatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, data).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> DatasetResult<T> {
    let raw = fs::read(path).map_err(|e| DatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_slice(&raw).map_err(|e| DatasetError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}
