//! Core types, error definitions, and data structures for archive_dataset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::partition::PartitionError;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("toml parse error at {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("archive format error at {path}: {msg}")]
    Format { path: PathBuf, msg: String },
    #[error("decompression failed for {path}: {source}")]
    Decompress {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed image identifier {0:?} (expected \"<batch>_<index:05>\")")]
    BadIdentifier(String),
    #[error("image {id} is outside the loaded archive: {reason}")]
    OutOfRange { id: String, reason: String },
    #[error("split files are inconsistent: {0}")]
    SplitConsistency(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("{0}")]
    Other(String),
}

impl DatasetError {
    /// True for the corrupt-data family: bad archives, bad identifiers, offsets
    /// beyond a buffer, failed decompression.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            DatasetError::Format { .. }
                | DatasetError::Decompress { .. }
                | DatasetError::BadIdentifier(_)
                | DatasetError::OutOfRange { .. }
        )
    }
}

impl From<data_contracts::ValidationError> for DatasetError {
    fn from(err: data_contracts::ValidationError) -> Self {
        DatasetError::SplitConsistency(err.to_string())
    }
}

/// Position of one image inside the loaded archive.
///
/// Renders as `"<batch>_<index>"` with the index zero padded to five digits.
/// Ordering is archive order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageId {
    pub batch: usize,
    pub index: usize,
}

impl ImageId {
    pub fn new(batch: usize, index: usize) -> Self {
        Self { batch, index }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:05}", self.batch, self.index)
    }
}

impl FromStr for ImageId {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || DatasetError::BadIdentifier(s.to_string());
        let (batch, index) = s.split_once('_').ok_or_else(bad)?;
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(batch) || !all_digits(index) || index.len() < 5 {
            return Err(bad());
        }
        // "%05d" only pads; a longer index must not carry a leading zero.
        if index.len() > 5 && index.starts_with('0') {
            return Err(bad());
        }
        // "%d" never pads the batch.
        if batch.len() > 1 && batch.starts_with('0') {
            return Err(bad());
        }
        Ok(ImageId {
            batch: batch.parse().map_err(|_| bad())?,
            index: index.parse().map_err(|_| bad())?,
        })
    }
}

pub(crate) const COMPRESSED_IMAGE_HEADER: usize = 16;
pub(crate) const COMPRESSED_LABEL_HEADER: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// Batch files of `label + R plane + G plane + B plane` records.
    Packed,
    /// Gzip image stream plus gzip label stream, single channel.
    Compressed,
}

impl ArchiveFormat {
    pub fn default_side(&self) -> u32 {
        match self {
            ArchiveFormat::Packed => 32,
            ArchiveFormat::Compressed => 28,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            ArchiveFormat::Packed => 3,
            ArchiveFormat::Compressed => 1,
        }
    }

    pub fn pixel_len(&self, side: u32) -> usize {
        self.channels() * side as usize * side as usize
    }

    /// Bytes per record in the pixel buffer (the packed label byte included).
    pub fn record_len(&self, side: u32) -> usize {
        match self {
            ArchiveFormat::Packed => 1 + self.pixel_len(side),
            ArchiveFormat::Compressed => self.pixel_len(side),
        }
    }
}

/// Which of the three per-category lists a consumer reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    All,
    #[default]
    Train,
    Test,
}

impl SplitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitKind::All => "all",
            SplitKind::Train => "train",
            SplitKind::Test => "test",
        }
    }
}
