//! One-image-per-step feed: order, clock, decode, augment.

use std::ops::Range;
use std::sync::Arc;

use image::DynamicImage;

use crate::archive::{invert_polarity, Corpus};
use crate::aug::{AugmentConfig, AugmentPipeline, AugmentationSample};
use crate::categories::CategorySet;
use crate::clock::{CounterClock, CounterReading, TimeScale};
use crate::config::FeedConfig;
use crate::order::PresentationOrder;
use crate::partition::WorkerPartition;
use crate::types::{DatasetError, DatasetResult, ImageId, SplitKind};

/// Salt separating the augmentation RNG stream from the order stream.
pub const AUG_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Downstream consumer of served images (feature extraction, usually).
pub trait FeatureFilter {
    type Output;
    fn filter(&mut self, image: &DynamicImage) -> Self::Output;
}

impl<F, T> FeatureFilter for F
where
    F: FnMut(&DynamicImage) -> T,
{
    type Output = T;
    fn filter(&mut self, image: &DynamicImage) -> T {
        self(image)
    }
}

/// Result of one `step`.
#[derive(Debug, Clone)]
pub struct ServedImage {
    /// `"category/identifier"`.
    pub flat_id: String,
    pub id: ImageId,
    pub category: usize,
    /// Position in the split's flat list.
    pub row: usize,
    pub image: DynamicImage,
    pub sample: AugmentationSample,
}

#[derive(Debug, Clone)]
struct RunState {
    order: PresentationOrder,
    clock: CounterClock,
    augment: AugmentPipeline,
}

#[derive(Debug, Clone)]
pub struct ImageFeed {
    corpus: Arc<Corpus>,
    categories: CategorySet,
    split: SplitKind,
    augment: AugmentConfig,
    seed: u64,
    max_epochs: usize,
    partition: Option<WorkerPartition>,
    invert: bool,
    run: u64,
    state: Option<RunState>,
}

impl ImageFeed {
    pub fn new(corpus: Arc<Corpus>, categories: CategorySet, cfg: &FeedConfig) -> Self {
        Self {
            corpus,
            categories,
            split: cfg.split,
            augment: cfg.augment,
            seed: cfg.resolve_seed(),
            max_epochs: cfg.max_epochs,
            partition: cfg.partition,
            invert: cfg.invert_polarity,
            run: 0,
            state: None,
        }
    }

    /// Load the archive and take the split from `cfg.split_files` when the
    /// whole set is on disk, otherwise from the archive's own batches.
    pub fn from_config(cfg: &FeedConfig) -> DatasetResult<Self> {
        cfg.validate()?;
        let corpus = Arc::new(Corpus::load(&cfg.archive)?);
        let categories = match &cfg.split_files {
            Some(files) if files.is_complete() => match CategorySet::restore(files)
                .and_then(|set| set.check_within(&corpus).map(|()| set))
            {
                Ok(set) => set,
                Err(err) => {
                    tracing::warn!(error = %err, "split restore failed; using archive split");
                    CategorySet::build_from_archive(&corpus)?
                }
            },
            _ => CategorySet::build_from_archive(&corpus)?,
        };
        let summary = categories.summary(&corpus);
        tracing::info!(
            images = summary.totals.all,
            train = summary.totals.train,
            test = summary.totals.test,
            categories = categories.len(),
            augment = %cfg.augment.describe(),
            "feed ready"
        );
        Ok(Self::new(corpus, categories, cfg))
    }

    /// Start run `run`: owned range, first permutation, fresh counters.
    pub fn init(&mut self, run: u64) -> DatasetResult<()> {
        let total = self.categories.flat(self.split).len();
        let range = match &self.partition {
            Some(p) => p.range(total)?,
            None => 0..total,
        };
        let order = PresentationOrder::new(range.clone(), self.seed ^ run);
        let clock = CounterClock::new(run, order.len(), self.max_epochs);
        let augment = AugmentPipeline::new(self.augment, self.seed ^ run ^ AUG_STREAM);
        tracing::debug!(
            run,
            split = self.split.as_str(),
            start = range.start,
            end = range.end,
            "feed initialised"
        );
        self.run = run;
        self.state = Some(RunState {
            order,
            clock,
            augment,
        });
        Ok(())
    }

    /// Serve the next image. `None` when this worker owns nothing.
    ///
    /// A failed lookup or decode leaves the order and the counters untouched,
    /// so the same row is attempted again on the next call.
    pub fn step(&mut self) -> DatasetResult<Option<ServedImage>> {
        if self.state.is_none() {
            self.init(self.run)?;
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let Some(row) = state.order.pending() else {
            return Ok(None);
        };
        let (category, id) = self.categories.entry(self.split, row).ok_or_else(|| {
            DatasetError::Other(format!("row {row} is past the {} flat list", self.split.as_str()))
        })?;
        let mut image = self.corpus.decode(id)?;
        let flat_id = self.categories.flat(self.split)[row].clone();
        state.order.advance();
        state.clock.tick(row);

        if self.invert {
            invert_polarity(&mut image);
        }
        let (image, sample) = state.augment.perturb(&image);

        let epoch = state.clock.counter(TimeScale::Epoch);
        if epoch.rolled_over {
            tracing::debug!(
                epoch = epoch.current,
                run = state.clock.counter(TimeScale::Run).current,
                reshuffles = state.order.reshuffles(),
                "epoch complete"
            );
        }
        Ok(Some(ServedImage {
            flat_id,
            id,
            category,
            row,
            image,
            sample,
        }))
    }

    /// Serve the next image straight into `filter`.
    pub fn step_with<F: FeatureFilter>(
        &mut self,
        filter: &mut F,
    ) -> DatasetResult<Option<(ServedImage, F::Output)>> {
        Ok(self.step()?.map(|served| {
            let out = filter.filter(&served.image);
            (served, out)
        }))
    }

    /// Current reading at `scale`; before `init` everything reads as unstarted.
    pub fn counter(&self, scale: TimeScale) -> CounterReading {
        match &self.state {
            Some(state) => state.clock.counter(scale),
            None => CounterClock::new(self.run, 0, self.max_epochs).counter(scale),
        }
    }

    pub fn owned_range(&self) -> Option<Range<usize>> {
        self.state.as_ref().map(|s| s.order.range())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn split(&self) -> SplitKind {
        self.split
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn corpus(&self) -> &Arc<Corpus> {
        &self.corpus
    }

    /// Curate, then restart the current run over the new flat list.
    pub fn select_categories<S: AsRef<str>>(&mut self, keep: &[S]) -> DatasetResult<()> {
        self.categories.select_categories(keep);
        self.init(self.run)
    }

    pub fn delete_categories<S: AsRef<str>>(&mut self, drop: &[S]) -> DatasetResult<()> {
        self.categories.delete_categories(drop);
        self.init(self.run)
    }
}
