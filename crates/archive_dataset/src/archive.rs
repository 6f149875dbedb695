//! Loading binary image archives into memory and decoding single records.

use crate::types::{
    ArchiveFormat, DatasetError, DatasetResult, ImageId, COMPRESSED_IMAGE_HEADER,
    COMPRESSED_LABEL_HEADER,
};
use data_contracts::BatchSummary;
use flate2::read::GzDecoder;
use image::{DynamicImage, GrayImage, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Files making up one batch. Packed archives only use `images`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFiles {
    pub images: PathBuf,
    #[serde(default)]
    pub labels: Option<PathBuf>,
}

impl BatchFiles {
    pub fn packed(path: impl Into<PathBuf>) -> Self {
        Self {
            images: path.into(),
            labels: None,
        }
    }

    pub fn compressed(images: impl Into<PathBuf>, labels: impl Into<PathBuf>) -> Self {
        Self {
            images: images.into(),
            labels: Some(labels.into()),
        }
    }
}

/// Where category names come from, in label order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorySource {
    /// Plain-text file, one name per line, relative to the archive root.
    File(PathBuf),
    Names(Vec<String>),
    /// Categories named `"0"`, `"1"`, ... `"n-1"`.
    Numbered(usize),
}

impl Default for CategorySource {
    fn default() -> Self {
        CategorySource::Numbered(10)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub format: ArchiveFormat,
    pub root: PathBuf,
    /// Square image side; defaults per format.
    #[serde(default)]
    pub side: Option<u32>,
    pub batches: Vec<BatchFiles>,
    /// Batch indices whose images form the held-out (test) split.
    #[serde(default)]
    pub held_out: Vec<usize>,
    #[serde(default)]
    pub categories: CategorySource,
}

impl ArchiveSpec {
    /// The binary CIFAR-10 layout: five training batches, one test batch.
    pub fn cifar10(root: impl Into<PathBuf>) -> Self {
        let mut batches: Vec<BatchFiles> = (1..=5)
            .map(|i| BatchFiles::packed(format!("data_batch_{i}.bin")))
            .collect();
        batches.push(BatchFiles::packed("test_batch.bin"));
        Self {
            format: ArchiveFormat::Packed,
            root: root.into(),
            side: None,
            batches,
            held_out: vec![5],
            categories: CategorySource::File(PathBuf::from("batches.meta.txt")),
        }
    }

    /// The gzip MNIST layout: training pair followed by the t10k pair.
    pub fn mnist(root: impl Into<PathBuf>) -> Self {
        Self {
            format: ArchiveFormat::Compressed,
            root: root.into(),
            side: None,
            batches: vec![
                BatchFiles::compressed("train-images-idx3-ubyte.gz", "train-labels-idx1-ubyte.gz"),
                BatchFiles::compressed("t10k-images-idx3-ubyte.gz", "t10k-labels-idx1-ubyte.gz"),
            ],
            held_out: vec![1],
            categories: CategorySource::Numbered(10),
        }
    }

    pub fn side(&self) -> u32 {
        self.side.unwrap_or_else(|| self.format.default_side())
    }

    pub fn validate(&self) -> DatasetResult<()> {
        if self.side() == 0 {
            return Err(DatasetError::Config("image side must be positive".into()));
        }
        if let Some(bad) = self.held_out.iter().find(|b| **b >= self.batches.len()) {
            return Err(DatasetError::Config(format!(
                "held-out batch {bad} does not exist ({} batches)",
                self.batches.len()
            )));
        }
        if self.format == ArchiveFormat::Compressed {
            if let Some(i) = self.batches.iter().position(|b| b.labels.is_none()) {
                return Err(DatasetError::Config(format!(
                    "compressed batch {i} has no label stream"
                )));
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Raw bytes of one source file, read-only after load.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuffer {
    source: PathBuf,
    pixels: Vec<u8>,
    /// Separate label stream (compressed format); packed labels live inline.
    labels: Option<Vec<u8>>,
    records: usize,
    held_out: bool,
    loaded: bool,
}

impl ArchiveBuffer {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn is_held_out(&self) -> bool {
        self.held_out
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn label(&self, format: ArchiveFormat, side: u32, index: usize) -> Option<u8> {
        match &self.labels {
            Some(labels) => labels.get(index).copied(),
            None => self.pixels.get(index * format.record_len(side)).copied(),
        }
    }

    fn pixel_bytes(&self, format: ArchiveFormat, side: u32, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(format.record_len(side))?;
        let start = match format {
            ArchiveFormat::Packed => start + 1,
            ArchiveFormat::Compressed => start,
        };
        self.pixels.get(start..start + format.pixel_len(side))
    }

    fn summary(&self) -> BatchSummary {
        BatchSummary {
            source: self.source.clone(),
            records: self.records,
            held_out: self.held_out,
            loaded: self.loaded,
        }
    }
}

/// All archive buffers of one dataset plus the category names.
///
/// Decoding never mutates the buffers, so a `Corpus` behind an `Arc` can be
/// decoded from many threads at once.
#[derive(Debug, Clone)]
pub struct Corpus {
    format: ArchiveFormat,
    side: u32,
    buffers: Vec<ArchiveBuffer>,
    category_names: Vec<String>,
}

impl Corpus {
    /// Read every batch file into memory.
    ///
    /// Missing or unreadable batch files leave an empty slot and a warning;
    /// corrupt contents are a format error.
    pub fn load(spec: &ArchiveSpec) -> DatasetResult<Self> {
        spec.validate()?;
        let side = spec.side();
        let category_names = read_category_names(spec)?;
        let buffers = spec
            .batches
            .par_iter()
            .enumerate()
            .map(|(i, files)| load_batch(spec, side, files, spec.held_out.contains(&i)))
            .collect::<DatasetResult<Vec<_>>>()?;
        let corpus = Self {
            format: spec.format,
            side,
            buffers,
            category_names,
        };
        tracing::info!(
            root = %spec.root.display(),
            format = ?corpus.format,
            side,
            batches = corpus.buffers.len(),
            images = corpus.len(),
            categories = corpus.category_names.len(),
            "archive loaded"
        );
        Ok(corpus)
    }

    /// Assemble a corpus from in-memory batches given as
    /// `(pixels, labels, held_out)`: packed records with `labels = None`, or
    /// for the compressed format the header-stripped pixel and label payloads.
    pub fn from_memory(
        format: ArchiveFormat,
        side: u32,
        batches: Vec<(Vec<u8>, Option<Vec<u8>>, bool)>,
        category_names: Vec<String>,
    ) -> DatasetResult<Self> {
        if side == 0 {
            return Err(DatasetError::Config("image side must be positive".into()));
        }
        let buffers = batches
            .into_iter()
            .enumerate()
            .map(|(i, (pixels, labels, held_out))| {
                let source = PathBuf::from(format!("<memory:{i}>"));
                build_buffer(source, format, side, pixels, labels, held_out)
            })
            .collect::<DatasetResult<Vec<_>>>()?;
        Ok(Self {
            format,
            side,
            buffers,
            category_names,
        })
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    pub fn buffers(&self) -> &[ArchiveBuffer] {
        &self.buffers
    }

    pub fn category_names(&self) -> &[String] {
        &self.category_names
    }

    /// Total number of records over all loaded batches.
    pub fn len(&self) -> usize {
        self.buffers.iter().map(ArchiveBuffer::records).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in batch `batch`; 0 for missing slots and unknown batches.
    pub fn records(&self, batch: usize) -> usize {
        self.buffers.get(batch).map_or(0, ArchiveBuffer::records)
    }

    /// Every identifier in archive order.
    pub fn ids(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.buffers
            .iter()
            .enumerate()
            .flat_map(|(batch, buf)| (0..buf.records).map(move |index| ImageId { batch, index }))
    }

    pub fn label(&self, id: ImageId) -> DatasetResult<u8> {
        let buffer = self.buffer_for(id)?;
        buffer
            .label(self.format, self.side, id.index)
            .ok_or_else(|| out_of_range(id, "label offset past end of buffer"))
    }

    /// Recover the pixel grid of one record: RGB for packed archives,
    /// luma for compressed ones.
    pub fn decode(&self, id: ImageId) -> DatasetResult<DynamicImage> {
        let buffer = self.buffer_for(id)?;
        let bytes = buffer
            .pixel_bytes(self.format, self.side, id.index)
            .ok_or_else(|| out_of_range(id, "pixel range past end of buffer"))?;
        let side = self.side;
        match self.format {
            ArchiveFormat::Packed => {
                let plane = (side * side) as usize;
                let img = RgbImage::from_fn(side, side, |x, y| {
                    let p = (y * side + x) as usize;
                    image::Rgb([bytes[p], bytes[plane + p], bytes[2 * plane + p]])
                });
                Ok(DynamicImage::ImageRgb8(img))
            }
            ArchiveFormat::Compressed => GrayImage::from_raw(side, side, bytes.to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| out_of_range(id, "pixel range shorter than one image")),
        }
    }

    /// Parse a `"b_nnnnn"` identifier and decode it.
    pub fn decode_str(&self, id: &str) -> DatasetResult<DynamicImage> {
        self.decode(id.parse()?)
    }

    pub fn batch_summaries(&self) -> Vec<BatchSummary> {
        self.buffers.iter().map(ArchiveBuffer::summary).collect()
    }

    fn buffer_for(&self, id: ImageId) -> DatasetResult<&ArchiveBuffer> {
        let buffer = self.buffers.get(id.batch).ok_or_else(|| {
            out_of_range(id, &format!("only {} batches loaded", self.buffers.len()))
        })?;
        if id.index >= buffer.records {
            return Err(out_of_range(
                id,
                &format!("batch {} holds {} records", id.batch, buffer.records),
            ));
        }
        Ok(buffer)
    }
}

/// Flip compressed-format "ink is high" pixels to paper-white polarity.
pub fn invert_polarity(img: &mut DynamicImage) {
    img.invert();
}

fn out_of_range(id: ImageId, reason: &str) -> DatasetError {
    DatasetError::OutOfRange {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn read_category_names(spec: &ArchiveSpec) -> DatasetResult<Vec<String>> {
    match &spec.categories {
        CategorySource::Names(names) => Ok(names.clone()),
        CategorySource::Numbered(n) => Ok((0..*n).map(|i| i.to_string()).collect()),
        CategorySource::File(rel) => {
            let path = spec.resolve(rel);
            let raw = fs::read_to_string(&path).map_err(|e| DatasetError::Io {
                path: path.clone(),
                source: e,
            })?;
            let names: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            let mut seen = HashSet::with_capacity(names.len());
            if let Some(dup) = names.iter().find(|n| !seen.insert(n.as_str())) {
                return Err(DatasetError::Format {
                    path,
                    msg: format!("category {dup:?} is listed more than once"),
                });
            }
            Ok(names)
        }
    }
}

/// Read a whole file, or log and return `None` when it cannot be read.
fn read_optional(path: &Path) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "archive file unavailable; slot left empty");
            None
        }
    }
}

fn gunzip(path: &Path, raw: &[u8]) -> DatasetResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| DatasetError::Decompress {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(out)
}

fn strip_header(path: &Path, mut bytes: Vec<u8>, header: usize) -> DatasetResult<Vec<u8>> {
    if bytes.len() < header {
        return Err(DatasetError::Format {
            path: path.to_path_buf(),
            msg: format!("{} bytes is shorter than the {header}-byte header", bytes.len()),
        });
    }
    bytes.drain(..header);
    Ok(bytes)
}

fn load_batch(
    spec: &ArchiveSpec,
    side: u32,
    files: &BatchFiles,
    held_out: bool,
) -> DatasetResult<ArchiveBuffer> {
    let images_path = spec.resolve(&files.images);
    let empty = || ArchiveBuffer {
        source: images_path.clone(),
        held_out,
        ..Default::default()
    };
    match spec.format {
        ArchiveFormat::Packed => {
            let Some(bytes) = read_optional(&images_path) else {
                return Ok(empty());
            };
            let buffer = build_buffer(images_path.clone(), spec.format, side, bytes, None, held_out)?;
            tracing::debug!(path = %images_path.display(), records = buffer.records, held_out, "packed batch read");
            Ok(buffer)
        }
        ArchiveFormat::Compressed => {
            let labels_path = match &files.labels {
                Some(p) => spec.resolve(p),
                None => {
                    return Err(DatasetError::Config(format!(
                        "{} has no label stream",
                        images_path.display()
                    )))
                }
            };
            let (Some(raw_images), Some(raw_labels)) =
                (read_optional(&images_path), read_optional(&labels_path))
            else {
                return Ok(empty());
            };
            let images = strip_header(
                &images_path,
                gunzip(&images_path, &raw_images)?,
                COMPRESSED_IMAGE_HEADER,
            )?;
            let labels = strip_header(
                &labels_path,
                gunzip(&labels_path, &raw_labels)?,
                COMPRESSED_LABEL_HEADER,
            )?;
            let buffer = build_buffer(
                images_path.clone(),
                spec.format,
                side,
                images,
                Some(labels),
                held_out,
            )?;
            tracing::debug!(path = %images_path.display(), records = buffer.records, held_out, "compressed batch read");
            Ok(buffer)
        }
    }
}

fn build_buffer(
    source: PathBuf,
    format: ArchiveFormat,
    side: u32,
    pixels: Vec<u8>,
    labels: Option<Vec<u8>>,
    held_out: bool,
) -> DatasetResult<ArchiveBuffer> {
    let record_len = format.record_len(side);
    if pixels.len() % record_len != 0 {
        return Err(DatasetError::Format {
            path: source,
            msg: format!(
                "{} bytes is not a whole number of {record_len}-byte records",
                pixels.len()
            ),
        });
    }
    let records = pixels.len() / record_len;
    match (format, &labels) {
        (ArchiveFormat::Compressed, Some(l)) if l.len() != records => {
            return Err(DatasetError::Format {
                path: source,
                msg: format!("{records} images but {} labels", l.len()),
            });
        }
        (ArchiveFormat::Compressed, None) => {
            return Err(DatasetError::Format {
                path: source,
                msg: "compressed batch without labels".into(),
            });
        }
        _ => {}
    }
    Ok(ArchiveBuffer {
        source,
        pixels,
        labels,
        records,
        held_out,
        loaded: true,
    })
}
