//! Random affine perturbation (translate, scale, rotate) of served images.

use crate::types::{DatasetError, DatasetResult};
use image::{DynamicImage, ImageBuffer, Pixel};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Largest translation per axis, as a fraction of the image side
    /// (the applied shift is half of this times the side).
    pub trans_max: (f32, f32),
    /// Gaussian std-dev for translation; 0 selects uniform sampling.
    pub trans_sigma: f32,
    /// Inclusive (min, max) scale factor.
    pub scale_range: (f32, f32),
    /// Largest rotation in degrees, either direction.
    pub rotate_max: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            trans_max: (0.3, 0.3),
            trans_sigma: 0.0,
            scale_range: (0.5, 1.1),
            rotate_max: 8.0,
        }
    }
}

impl AugmentConfig {
    /// No perturbation at all.
    pub fn identity() -> Self {
        Self {
            trans_max: (0.0, 0.0),
            trans_sigma: 0.0,
            scale_range: (1.0, 1.0),
            rotate_max: 0.0,
        }
    }

    pub fn validate(&self) -> DatasetResult<()> {
        let finite = [
            self.trans_max.0,
            self.trans_max.1,
            self.trans_sigma,
            self.scale_range.0,
            self.scale_range.1,
            self.rotate_max,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(DatasetError::Config("augmentation values must be finite".into()));
        }
        if self.trans_max.0 < 0.0 || self.trans_max.1 < 0.0 || self.rotate_max < 0.0 {
            return Err(DatasetError::Config(
                "trans_max and rotate_max must be non-negative".into(),
            ));
        }
        if self.trans_sigma < 0.0 {
            return Err(DatasetError::Config("trans_sigma must be non-negative".into()));
        }
        let (lo, hi) = self.scale_range;
        if lo <= 0.0 || lo > hi {
            return Err(DatasetError::Config(format!(
                "scale_range ({lo}, {hi}) must satisfy 0 < min <= max"
            )));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "trans_max=({:.2},{:.2}) trans_sigma={:.3} scale=[{:.2},{:.2}] rotate_max={:.1}deg",
            self.trans_max.0,
            self.trans_max.1,
            self.trans_sigma,
            self.scale_range.0,
            self.scale_range.1,
            self.rotate_max
        )
    }
}

#[derive(Debug, Clone)]
pub struct AugmentConfigBuilder {
    inner: AugmentConfig,
}

impl Default for AugmentConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AugmentConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: AugmentConfig::default(),
        }
    }
    pub fn translation(mut self, max: (f32, f32), sigma: f32) -> Self {
        self.inner.trans_max = max;
        self.inner.trans_sigma = sigma;
        self
    }
    pub fn scale_range(mut self, min: f32, max: f32) -> Self {
        self.inner.scale_range = (min, max);
        self
    }
    pub fn rotate_max(mut self, degrees: f32) -> Self {
        self.inner.rotate_max = degrees;
        self
    }
    pub fn build(self) -> DatasetResult<AugmentConfig> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

/// Perturbation drawn for one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AugmentationSample {
    /// Per-axis shift as a fraction of the side (see [`AugmentConfig::trans_max`]).
    pub translation: (f32, f32),
    pub scale: f32,
    /// Degrees.
    pub rotation: f32,
}

impl AugmentationSample {
    pub fn identity() -> Self {
        Self {
            translation: (0.0, 0.0),
            scale: 1.0,
            rotation: 0.0,
        }
    }

    /// `translate(center + 0.5·t·size) ∘ scale ∘ rotate ∘ translate(-center)`.
    pub fn transform(&self, width: u32, height: u32) -> AffineTransform {
        let (w, h) = (width as f32, height as f32);
        let (cx, cy) = (w / 2.0, h / 2.0);
        let shift = (
            cx + 0.5 * self.translation.0 * w,
            cy + 0.5 * self.translation.1 * h,
        );
        AffineTransform::translate(shift.0, shift.1)
            .compose(&AffineTransform::scale(self.scale))
            .compose(&AffineTransform::rotate(self.rotation))
            .compose(&AffineTransform::translate(-cx, -cy))
    }
}

/// Draw one perturbation. With `trans_sigma > 0` translation is Gaussian and
/// clamped to `±trans_max` afterwards, so clipped tail mass lands on the
/// bound.
pub fn sample(cfg: &AugmentConfig, rng: &mut dyn RngCore) -> AugmentationSample {
    let normal = if cfg.trans_sigma > 0.0 {
        Normal::new(0.0f32, cfg.trans_sigma).ok()
    } else {
        None
    };
    let mut axis = |max: f32| -> f32 {
        match &normal {
            Some(n) => n.sample(&mut *rng).clamp(-max, max),
            None => symmetric(max, &mut *rng),
        }
    };
    let tx = axis(cfg.trans_max.0);
    let ty = axis(cfg.trans_max.1);
    let (lo, hi) = cfg.scale_range;
    let scale = if hi > lo { rng.random_range(lo..=hi) } else { lo };
    let rotation = symmetric(cfg.rotate_max, rng);
    AugmentationSample {
        translation: (tx, ty),
        scale,
        rotation,
    }
}

fn symmetric(max: f32, rng: &mut dyn RngCore) -> f32 {
    if max > 0.0 {
        rng.random_range(-max..=max)
    } else {
        0.0
    }
}

/// Row-major 2x3 affine matrix mapping source to destination coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub m: [[f32; 3]; 2],
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    pub fn scale(s: f32) -> Self {
        Self {
            m: [[s, 0.0, 0.0], [0.0, s, 0.0]],
        }
    }

    pub fn rotate(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            m: [[cos, -sin, 0.0], [sin, cos, 0.0]],
        }
    }

    /// `self ∘ other`: `other` applies first.
    pub fn compose(&self, other: &AffineTransform) -> Self {
        let a = &self.m;
        let b = &other.m;
        let mut m = [[0.0f32; 3]; 2];
        for (r, row) in m.iter_mut().enumerate() {
            row[0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            row[1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            row[2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }
        Self { m }
    }

    /// `None` for a singular matrix (zero scale).
    pub fn inverse(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.m;
        let det = a * d - b * c;
        if det.abs() <= f32::EPSILON {
            return None;
        }
        let inv = 1.0 / det;
        let (ia, ib, ic, id) = (d * inv, -b * inv, -c * inv, a * inv);
        Some(Self {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }

    pub fn apply_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }
}

/// Resample `image` through the perturbation. The canvas starts out in the
/// source's top-left color, so uncovered regions get that color.
pub fn apply(image: &DynamicImage, sample: &AugmentationSample) -> DynamicImage {
    let xf = sample.transform(image.width(), image.height());
    match image {
        DynamicImage::ImageLuma8(img) => DynamicImage::ImageLuma8(warp(img, &xf)),
        DynamicImage::ImageRgb8(img) => DynamicImage::ImageRgb8(warp(img, &xf)),
        other => DynamicImage::ImageRgb8(warp(&other.to_rgb8(), &xf)),
    }
}

fn warp<P>(src: &ImageBuffer<P, Vec<u8>>, xf: &AffineTransform) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let background = *src.get_pixel(0, 0);
    let mut dst = ImageBuffer::from_pixel(w, h, background);
    let Some(inv) = xf.inverse() else {
        return dst;
    };
    for (x, y, px) in dst.enumerate_pixels_mut() {
        // pixel centers sit at +0.5
        let (sx, sy) = inv.apply_point(x as f32 + 0.5, y as f32 + 0.5);
        if let Some(v) = sample_bilinear(src, sx - 0.5, sy - 0.5, &background) {
            *px = v;
        }
    }
    dst
}

/// Bilinear lookup at continuous pixel coordinates; taps outside the source
/// read as `background`. `None` when no tap lands inside.
fn sample_bilinear<P>(src: &ImageBuffer<P, Vec<u8>>, x: f32, y: f32, background: &P) -> Option<P>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = src.dimensions();
    if !(x > -1.0 && y > -1.0 && x < w as f32 && y < h as f32) {
        return None;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let tap = |dx: i64, dy: i64| -> P {
        let px = x0 as i64 + dx;
        let py = y0 as i64 + dy;
        if px < 0 || py < 0 || px >= w as i64 || py >= h as i64 {
            *background
        } else {
            *src.get_pixel(px as u32, py as u32)
        }
    };
    let taps = [
        (tap(0, 0), (1.0 - fx) * (1.0 - fy)),
        (tap(1, 0), fx * (1.0 - fy)),
        (tap(0, 1), (1.0 - fx) * fy),
        (tap(1, 1), fx * fy),
    ];
    let channels = P::CHANNEL_COUNT as usize;
    let mut out = [0u8; 4];
    for (c, slot) in out.iter_mut().enumerate().take(channels) {
        let v: f32 = taps
            .iter()
            .map(|(p, weight)| p.channels()[c] as f32 * weight)
            .sum();
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(*P::from_slice(&out[..channels]))
}

/// Sampling config plus the RNG stream for one feed.
#[derive(Debug, Clone)]
pub struct AugmentPipeline {
    cfg: AugmentConfig,
    rng: rand::rngs::StdRng,
}

impl AugmentPipeline {
    pub fn new(cfg: AugmentConfig, seed: u64) -> Self {
        use rand::SeedableRng;
        Self {
            cfg,
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.cfg
    }

    pub fn next_sample(&mut self) -> AugmentationSample {
        sample(&self.cfg, &mut self.rng)
    }

    /// Draw a perturbation and apply it.
    pub fn perturb(&mut self, image: &DynamicImage) -> (DynamicImage, AugmentationSample) {
        let s = self.next_sample();
        (apply(image, &s), s)
    }
}
