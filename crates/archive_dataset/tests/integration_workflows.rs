//! End-to-end archive_dataset workflows against synthetic archives on disk.
//!
//! 1. Packed archive → category index → curation → frozen split round trip
//! 2. Gzip archive → decode → polarity inversion
//! 3. Config file → partitioned feed over several epochs

use archive_dataset::{
    ArchiveFormat, ArchiveSpec, BatchFiles, CategorySet, CategorySource, Corpus, DatasetError,
    FeedConfig, ImageFeed, ImageId, SplitKind, TimeScale, WorkerPartition,
};
use data_contracts::SplitFileSet;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

const SIDE: u32 = 4;

/// Packed batch with one record per label; pixel bytes carry the record index.
fn write_packed_batch(path: &Path, labels: &[u8]) -> anyhow::Result<()> {
    let plane = (SIDE * SIDE) as usize;
    let mut bytes = Vec::with_capacity(labels.len() * (1 + 3 * plane));
    for (i, label) in labels.iter().enumerate() {
        bytes.push(*label);
        for channel in 0..3u8 {
            bytes.extend(std::iter::repeat(i as u8 * 10 + channel).take(plane));
        }
    }
    fs::write(path, bytes)?;
    Ok(())
}

fn write_gz(path: &Path, header: usize, payload: &[u8]) -> anyhow::Result<()> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&vec![0u8; header])?;
    enc.write_all(payload)?;
    fs::write(path, enc.finish()?)?;
    Ok(())
}

/// Two training batches and a held-out batch over three categories.
fn packed_spec(root: &Path) -> anyhow::Result<ArchiveSpec> {
    fs::write(root.join("names.txt"), "cat\ndog\nfrog\n")?;
    write_packed_batch(&root.join("b0.bin"), &[0, 1, 2, 0])?;
    write_packed_batch(&root.join("b1.bin"), &[1, 1, 2])?;
    write_packed_batch(&root.join("held.bin"), &[0, 2])?;
    Ok(ArchiveSpec {
        format: ArchiveFormat::Packed,
        root: root.to_path_buf(),
        side: Some(SIDE),
        batches: vec![
            BatchFiles::packed("b0.bin"),
            BatchFiles::packed("b1.bin"),
            BatchFiles::packed("held.bin"),
        ],
        held_out: vec![2],
        categories: CategorySource::File("names.txt".into()),
    })
}

#[test]
fn workflow_packed_archive_to_frozen_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let spec = packed_spec(tmp.path())?;
    let corpus = Corpus::load(&spec)?;
    assert_eq!(corpus.len(), 9);
    assert_eq!(corpus.records(1), 3);

    let mut set = CategorySet::build_from_archive(&corpus)?;
    assert_eq!(set.names(), ["cat", "dog", "frog"]);
    assert_eq!(
        set.flat(SplitKind::Test),
        ["cat/2_00000", "frog/2_00001"]
    );
    assert_eq!(
        set.flat(SplitKind::Train),
        ["cat/0_00000", "cat/0_00003", "dog/0_00001", "dog/1_00000", "dog/1_00001", "frog/0_00002", "frog/1_00002"]
    );

    let summary = set.summary(&corpus);
    assert_eq!(summary.totals.all, 9);
    assert_eq!(summary.missing_batches().count(), 0);

    set.delete_categories(&["dog"]);
    assert_eq!(set.names(), ["cat", "frog"]);
    assert!(set.flat(SplitKind::All).iter().all(|f| !f.starts_with("dog/")));

    let files = SplitFileSet::new(tmp.path().join("splits"), "pets", 1);
    set.save(&files)?;
    let restored = CategorySet::restore(&files)?;
    assert_eq!(restored.names(), set.names());
    for split in [SplitKind::All, SplitKind::Train, SplitKind::Test] {
        assert_eq!(restored.flat(split), set.flat(split));
    }

    // every restored id still decodes against the same archive
    for id in restored.ids(SplitKind::All).iter().flatten() {
        corpus.decode(*id)?;
    }
    Ok(())
}

#[test]
fn workflow_missing_batch_leaves_empty_slot() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let spec = packed_spec(tmp.path())?;
    fs::remove_file(tmp.path().join("b1.bin"))?;
    let corpus = Corpus::load(&spec)?;
    assert_eq!(corpus.len(), 6);
    assert!(!corpus.buffers()[1].is_loaded());

    let set = CategorySet::build_from_archive(&corpus)?;
    let summary = set.summary(&corpus);
    assert_eq!(summary.missing_batches().count(), 1);

    let err = corpus.decode_str("1_00000").unwrap_err();
    assert!(err.is_format());
    Ok(())
}

#[test]
fn workflow_truncated_batch_is_format_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let spec = packed_spec(tmp.path())?;
    let path = tmp.path().join("b0.bin");
    let mut bytes = fs::read(&path)?;
    bytes.truncate(bytes.len() - 3);
    fs::write(&path, bytes)?;
    match Corpus::load(&spec) {
        Err(DatasetError::Format { path: p, .. }) => assert_eq!(p, path),
        other => anyhow::bail!("expected format error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn workflow_gzip_archive_decodes_and_inverts() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let root = tmp.path();
    let plane = (SIDE * SIDE) as usize;
    let labels = [3u8, 1, 3];
    let mut pixels = Vec::new();
    for i in 0..labels.len() {
        pixels.extend(std::iter::repeat(200 + i as u8).take(plane));
    }
    write_gz(&root.join("train-img.gz"), 16, &pixels)?;
    write_gz(&root.join("train-lbl.gz"), 8, &labels)?;
    write_gz(&root.join("test-img.gz"), 16, &vec![255u8; plane])?;
    write_gz(&root.join("test-lbl.gz"), 8, &[1])?;

    let spec = ArchiveSpec {
        side: Some(SIDE),
        batches: vec![
            BatchFiles::compressed("train-img.gz", "train-lbl.gz"),
            BatchFiles::compressed("test-img.gz", "test-lbl.gz"),
        ],
        ..ArchiveSpec::mnist(root)
    };
    let corpus = Corpus::load(&spec)?;
    assert_eq!(corpus.len(), 4);

    let mut img = corpus.decode_str("0_00002")?;
    assert_eq!(img.color(), image::ColorType::L8);
    assert!(img.as_bytes().iter().all(|b| *b == 202));
    archive_dataset::invert_polarity(&mut img);
    assert!(img.as_bytes().iter().all(|b| *b == 53));

    let set = CategorySet::build_from_archive(&corpus)?;
    assert_eq!(set.ids(SplitKind::Train)[3].len(), 2);
    assert_eq!(set.flat(SplitKind::Test), ["1/1_00000"]);
    Ok(())
}

#[test]
fn workflow_partitioned_feed_over_epochs() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let spec = packed_spec(tmp.path())?;
    let corpus = Arc::new(Corpus::load(&spec)?);
    let categories = CategorySet::build_from_archive(&corpus)?;
    let total = categories.flat(SplitKind::Train).len();
    let world_size = 2;
    let epochs = 3;

    let mut served_rows: HashMap<usize, usize> = HashMap::new();
    for rank in 0..world_size {
        let cfg = FeedConfig {
            archive: spec.clone(),
            seed: Some(5),
            partition: Some(WorkerPartition::new(rank, world_size)?),
            ..FeedConfig::default()
        };
        let mut feed = ImageFeed::new(Arc::clone(&corpus), categories.clone(), &cfg);
        feed.init(0)?;
        let owned = feed.owned_range().unwrap_or(0..0);
        let mut rollovers = 0;
        for _ in 0..epochs * owned.len() {
            let served = feed.step()?.ok_or_else(|| anyhow::anyhow!("feed ran dry"))?;
            assert!(owned.contains(&served.row));
            assert_eq!((served.image.width(), served.image.height()), (SIDE, SIDE));
            *served_rows.entry(served.row).or_default() += 1;
            if feed.counter(TimeScale::Epoch).rolled_over {
                rollovers += 1;
            }
        }
        assert_eq!(rollovers, epochs);
    }
    assert_eq!(served_rows.len(), total);
    assert!(served_rows.values().all(|n| *n == epochs));
    Ok(())
}

#[test]
fn workflow_config_file_restores_split() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let spec = packed_spec(tmp.path())?;
    let corpus = Corpus::load(&spec)?;
    let mut set = CategorySet::build_from_archive(&corpus)?;
    set.select_categories(&["frog"]);
    let split_dir = tmp.path().join("splits");
    set.save(&SplitFileSet::new(&split_dir, "frogs", 1))?;

    let toml = format!(
        r#"
split = "all"
seed = 9

[archive]
format = "packed"
root = {root:?}
side = 4
held_out = [2]
categories = {{ file = "names.txt" }}
batches = [{{ images = "b0.bin" }}, {{ images = "b1.bin" }}, {{ images = "held.bin" }}]

[augment]
rotate_max = 20.0

[split_files]
dir = {dir:?}
name = "frogs"
ntest = 1
"#,
        root = tmp.path().display().to_string(),
        dir = split_dir.display().to_string(),
    );
    let cfg_path = tmp.path().join("feed.toml");
    fs::write(&cfg_path, toml)?;
    let cfg = FeedConfig::from_path(&cfg_path)?;

    let mut feed = ImageFeed::from_config(&cfg)?;
    assert_eq!(feed.categories().names(), ["frog"]);
    feed.init(0)?;
    for _ in 0..6 {
        let served = feed.step()?.ok_or_else(|| anyhow::anyhow!("feed ran dry"))?;
        assert!(served.flat_id.starts_with("frog/"));
        assert!(served.sample.rotation.abs() <= 20.0);
    }
    Ok(())
}

#[test]
fn workflow_stale_split_falls_back_to_archive() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let spec = packed_spec(tmp.path())?;
    let files = SplitFileSet::new(tmp.path().join("splits"), "stale", 1);
    // written against a larger archive: batch 7 does not exist here
    CategorySet::from_split(
        vec!["cat".into()],
        vec![vec![ImageId::new(0, 0), ImageId::new(7, 0)]],
        vec![vec![]],
    )?
    .save(&files)?;

    let cfg = FeedConfig {
        archive: spec,
        seed: Some(2),
        split_files: Some(files),
        ..FeedConfig::default()
    };
    let mut feed = ImageFeed::from_config(&cfg)?;
    assert_eq!(feed.categories().names(), ["cat", "dog", "frog"]);
    assert_eq!(feed.categories().flat(SplitKind::Train).len(), 7);
    feed.init(0)?;
    for _ in 0..14 {
        feed.step()?.ok_or_else(|| anyhow::anyhow!("feed ran dry"))?;
    }
    assert_eq!(feed.counter(TimeScale::Epoch).current, 2);
    Ok(())
}
