//! Adaptive background model producing per-pixel foreground activity.
//!
//! The pipeline only depends on [`BackgroundModel`]; [`RunningGaussian`] is
//! the bundled implementation (one Gaussian per pixel, exponentially
//! weighted mean and variance).

use crate::frame::{FrameError, GrayImage};

/// Per-pixel background estimate updated once per frame.
pub trait BackgroundModel: Send {
    /// Update the model with `frame` and write activity scores (0–255) into
    /// `mask`. `learning_rate` in `[0, 1]` weights the new frame.
    fn apply(
        &mut self,
        frame: &GrayImage,
        mask: &mut GrayImage,
        learning_rate: f32,
    ) -> Result<(), FrameError>;

    /// Forget everything learned so far.
    fn reset(&mut self);
}

// --- Named constants ---
const INITIAL_VARIANCE: f32 = 15.0 * 15.0;
const MIN_VARIANCE: f32 = 4.0 * 4.0;
const MAX_VARIANCE: f32 = 75.0 * 75.0;
/// Deviation, in standard deviations, that saturates the activity score.
const SATURATION_SIGMAS: f32 = 4.0;

/// Single-Gaussian running background model.
///
/// Activity is `|pixel - mean| / (SATURATION_SIGMAS * sigma)` scaled to
/// 0–255. The first frame seen at a given resolution seeds the mean and
/// yields an all-zero mask.
pub struct RunningGaussian {
    mean: Vec<f32>,
    variance: Vec<f32>,
    dims: Option<(u32, u32)>,
}

impl RunningGaussian {
    pub fn new() -> Self {
        Self {
            mean: Vec::new(),
            variance: Vec::new(),
            dims: None,
        }
    }

    fn seed(&mut self, frame: &GrayImage) {
        self.mean.clear();
        for row in frame.rows() {
            self.mean.extend(row.iter().map(|&p| p as f32));
        }
        self.variance = vec![INITIAL_VARIANCE; self.mean.len()];
        self.dims = Some(frame.dims());
        tracing::debug!(
            width = frame.width(),
            height = frame.height(),
            "background model seeded"
        );
    }
}

impl Default for RunningGaussian {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundModel for RunningGaussian {
    fn apply(
        &mut self,
        frame: &GrayImage,
        mask: &mut GrayImage,
        learning_rate: f32,
    ) -> Result<(), FrameError> {
        if mask.dims() != frame.dims() {
            return Err(FrameError::DimensionMismatch {
                expected: frame.dims(),
                actual: mask.dims(),
            });
        }

        if self.dims != Some(frame.dims()) {
            self.seed(frame);
            for y in 0..mask.height() {
                mask.row_mut(y).fill(0);
            }
            return Ok(());
        }

        let alpha = learning_rate.clamp(0.0, 1.0);
        let width = frame.width() as usize;
        for y in 0..frame.height() {
            let base = y as usize * width;
            let mean = &mut self.mean[base..base + width];
            let variance = &mut self.variance[base..base + width];
            let out = mask.row_mut(y);

            for (x, &pixel) in frame.row(y).iter().enumerate() {
                let p = pixel as f32;
                let diff = p - mean[x];
                let sigma = variance[x].sqrt();
                let score = (diff.abs() / (SATURATION_SIGMAS * sigma)).min(1.0);
                out[x] = (score * 255.0).round() as u8;

                mean[x] += alpha * diff;
                variance[x] = ((1.0 - alpha) * variance[x] + alpha * diff * diff)
                    .clamp(MIN_VARIANCE, MAX_VARIANCE);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.mean.clear();
        self.variance.clear();
        self.dims = None;
    }
}
