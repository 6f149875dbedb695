//! Binary image archives as a randomized, partitioned training feed.
//!
//! This crate provides utilities for:
//! - Loading packed RGB and gzip grayscale archives and decoding records
//! - Category curation and frozen train/test splits
//! - Contiguous per-worker partitions with per-epoch reshuffling
//! - Nested run/epoch/trial/row counters
//! - Random affine augmentation

pub mod archive;
pub mod aug;
pub mod categories;
pub mod clock;
pub mod config;
pub mod feed;
pub mod order;
pub mod partition;
pub mod splits;
pub mod types;

pub use archive::{invert_polarity, ArchiveBuffer, ArchiveSpec, BatchFiles, CategorySource, Corpus};
pub use aug::{
    AffineTransform, AugmentConfig, AugmentConfigBuilder, AugmentPipeline, AugmentationSample,
};
pub use categories::{CategorySet, FlatLists, SplitLists};
pub use clock::{Counter, CounterClock, CounterReading, TimeScale};
pub use config::FeedConfig;
pub use feed::{FeatureFilter, ImageFeed, ServedImage};
pub use order::{OrderPhase, PresentationOrder};
pub use partition::{allocate, PartitionError, WorkerPartition};
pub use types::*;
