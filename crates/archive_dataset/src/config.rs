use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use data_contracts::SplitFileSet;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveSpec;
use crate::aug::AugmentConfig;
use crate::partition::WorkerPartition;
use crate::types::{DatasetError, DatasetResult, SplitKind};

pub const CONFIG_ENV: &str = "ARCHIVE_FEED_CONFIG";
pub const SEED_ENV: &str = "ARCHIVE_FEED_SEED";
const DEFAULT_CONFIG_NAME: &str = "archive-feed.toml";
const DEFAULT_ARCHIVE_ROOT: &str = "data/cifar-10-batches-bin";

/// Everything needed to stand up an [`ImageFeed`](crate::feed::ImageFeed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub archive: ArchiveSpec,
    pub augment: AugmentConfig,
    /// Which split the feed presents.
    pub split: SplitKind,
    /// Fixed seed; `None` defers to `ARCHIVE_FEED_SEED` then the clock.
    pub seed: Option<u64>,
    /// Epochs per run before Run advances; 0 = unbounded.
    pub max_epochs: usize,
    pub partition: Option<WorkerPartition>,
    /// Flip pixel polarity after decode (ink-low sources).
    pub invert_polarity: bool,
    /// Frozen split to restore instead of deriving one from the archive.
    pub split_files: Option<SplitFileSet>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            archive: ArchiveSpec::cifar10(DEFAULT_ARCHIVE_ROOT),
            augment: AugmentConfig::default(),
            split: SplitKind::Train,
            seed: None,
            max_epochs: 0,
            partition: None,
            invert_polarity: false,
            split_files: None,
        }
    }
}

impl FeedConfig {
    /// Read `$ARCHIVE_FEED_CONFIG` (or `archive-feed.toml`), falling back to
    /// defaults when the file is absent, then apply environment overrides.
    pub fn load() -> DatasetResult<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        let mut cfg = if path.exists() {
            Self::from_path(&path)?
        } else {
            tracing::debug!(path = %path.display(), "no feed config file, using defaults");
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&raw).map_err(|e| match e {
            DatasetError::Toml { source, .. } => DatasetError::Toml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(raw: &str) -> DatasetResult<Self> {
        toml::from_str(raw).map_err(|e| DatasetError::Toml {
            path: PathBuf::new(),
            source: e,
        })
    }

    /// `ARCHIVE_FEED_SEED`, `ARCHIVE_FEED_RANK` and `ARCHIVE_FEED_WORLD_SIZE`
    /// win over file values when they parse.
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = seed_from_env() {
            self.seed = Some(seed);
        }
        if let Some(partition) = WorkerPartition::from_env() {
            self.partition = Some(partition);
        }
    }

    /// Config seed, then env, else wall-clock nanos.
    pub fn resolve_seed(&self) -> u64 {
        if let Some(s) = self.seed {
            return s;
        }
        if let Some(s) = seed_from_env() {
            return s;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    }

    pub fn validate(&self) -> DatasetResult<()> {
        self.archive.validate()?;
        self.augment.validate()?;
        if let Some(p) = &self.partition {
            WorkerPartition::new(p.rank, p.world_size)?;
        }
        if let Some(files) = &self.split_files {
            if files.name.trim().is_empty() {
                return Err(DatasetError::Config("split_files.name is empty".into()));
            }
        }
        Ok(())
    }
}

fn seed_from_env() -> Option<u64> {
    std::env::var(SEED_ENV).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionError;
    use crate::types::ArchiveFormat;

    #[test]
    fn default_is_cifar_layout() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.archive.format, ArchiveFormat::Packed);
        assert_eq!(cfg.archive.batches.len(), 6);
        assert_eq!(cfg.split, SplitKind::Train);
        cfg.validate().unwrap();
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let raw = r#"
            split = "test"
            seed = 17
            max_epochs = 4
            invert_polarity = true

            [archive]
            format = "compressed"
            root = "/data/mnist"
            held_out = [1]
            categories = { numbered = 10 }
            batches = [
                { images = "train-images.gz", labels = "train-labels.gz" },
                { images = "t10k-images.gz", labels = "t10k-labels.gz" },
            ]

            [augment]
            trans_sigma = 0.1
            rotate_max = 0.0

            [partition]
            rank = 1
            world_size = 4
        "#;
        let cfg = FeedConfig::from_toml(raw).unwrap();
        assert_eq!(cfg.split, SplitKind::Test);
        assert_eq!(cfg.resolve_seed(), 17);
        assert_eq!(cfg.max_epochs, 4);
        assert!(cfg.invert_polarity);
        assert_eq!(cfg.archive.side(), 28);
        assert_eq!(cfg.augment.trans_sigma, 0.1);
        assert_eq!(cfg.augment.scale_range, (0.5, 1.1));
        assert_eq!(cfg.partition, Some(WorkerPartition { rank: 1, world_size: 4 }));
        cfg.validate().unwrap();
    }

    #[test]
    fn from_path_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("feed.toml");
        std::fs::write(&path, "max_epochs = 2\n").unwrap();
        let cfg = FeedConfig::from_path(&path).unwrap();
        assert_eq!(cfg.max_epochs, 2);
        assert_eq!(cfg.archive, ArchiveSpec::cifar10(DEFAULT_ARCHIVE_ROOT));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "max_epochs = \"many\"\n").unwrap();
        match FeedConfig::from_path(&path) {
            Err(DatasetError::Toml { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected toml error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_partition_rejected() {
        let cfg = FeedConfig {
            partition: Some(WorkerPartition { rank: 3, world_size: 2 }),
            ..FeedConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(DatasetError::Partition(PartitionError::RankOutOfBounds { rank: 3, world_size: 2 }))
        ));
    }
}
