//! Background consistency analysis.
//!
//! Each frame, the foreground mask is aggregated inside and outside the face
//! box. The per-frame signal is the normalised background activity, kept in a
//! bounded FIFO history for charting.

use crate::frame::GrayImage;
use crate::render::{draw_line, draw_rect, Paint, PaintStyle, Surface};
use crate::types::FaceBox;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const MIN_CONSISTENCY: f32 = 0.0;
pub const MAX_CONSISTENCY: f32 = 1.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("mask is {actual_width}x{actual_height}, caller claimed {width}x{height}")]
    InvalidInput {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Fixed-capacity FIFO of samples, oldest first.
#[derive(Debug, Clone)]
pub struct ConsistencyHistory {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl ConsistencyHistory {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one if full. Returns the evicted sample.
    pub fn push(&mut self, value: f32) -> Option<f32> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<f32> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.iter().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Which pixels the per-frame value was computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationRegion {
    /// Pixels outside the face box.
    Background,
    /// No usable face box: every pixel.
    WholeFrame,
}

/// Result of analysing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsistencySample {
    /// The value appended to the history, in `[0, 1]`.
    pub value: f32,
    /// Mean activity inside the face box, `None` without a usable box.
    pub face_activity: Option<f32>,
    /// Mean activity outside the face box, `None` without a usable box.
    pub background_activity: Option<f32>,
    pub region: AggregationRegion,
}

/// Geometry of the chart, relative to the drawing surface.
#[derive(Debug, Clone, Copy)]
pub struct ChartLayout {
    /// Fraction of the surface width used by the chart.
    pub width_fraction: f32,
    /// Fraction of the surface height used by the chart.
    pub height_fraction: f32,
    /// Gap to the bottom-left corner, in pixels.
    pub margin: u32,
}

impl Default for ChartLayout {
    fn default() -> Self {
        Self {
            width_fraction: 0.5,
            height_fraction: 0.25,
            margin: 4,
        }
    }
}

impl ChartLayout {
    /// Chart rectangle `(left, top, right, bottom)` on a surface of the given size.
    pub fn rect(&self, surface_width: u32, surface_height: u32) -> (f32, f32, f32, f32) {
        let margin = self.margin as f32;
        let w = (surface_width as f32 * self.width_fraction.clamp(0.0, 1.0) - margin).max(1.0);
        let h = (surface_height as f32 * self.height_fraction.clamp(0.0, 1.0) - margin).max(1.0);
        let bottom = surface_height as f32 - margin;
        (margin, bottom - h, margin + w, bottom)
    }
}

/// Accumulates the per-frame consistency signal.
pub struct ConsistencyAnalyzer {
    history: ConsistencyHistory,
    layout: ChartLayout,
    frames: u64,
}

impl ConsistencyAnalyzer {
    pub fn new(capacity: usize) -> Self {
        Self::with_layout(capacity, ChartLayout::default())
    }

    pub fn with_layout(capacity: usize, layout: ChartLayout) -> Self {
        Self {
            history: ConsistencyHistory::new(capacity),
            layout,
            frames: 0,
        }
    }

    pub fn history(&self) -> &ConsistencyHistory {
        &self.history
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.frames = 0;
    }

    /// Analyse `mask` against the current face box and append to history.
    ///
    /// `height` and `width` are what the caller believes the mask measures;
    /// a disagreement is rejected rather than misread. Without a face box, or
    /// when the box leaves no background pixels, the whole frame is used.
    pub fn process_frame(
        &mut self,
        mask: &GrayImage,
        height: u32,
        width: u32,
        face: Option<&FaceBox>,
    ) -> Result<ConsistencySample, ConsistencyError> {
        if mask.width() != width || mask.height() != height {
            return Err(ConsistencyError::InvalidInput {
                width,
                height,
                actual_width: mask.width(),
                actual_height: mask.height(),
            });
        }

        let sample = analyse(mask, face);
        self.history.push(sample.value);
        self.frames += 1;
        tracing::trace!(
            value = sample.value,
            region = ?sample.region,
            len = self.history.len(),
            "consistency sample"
        );
        Ok(sample)
    }

    /// Draw the history as a line chart in the bottom-left corner of `surface`.
    pub fn draw_chart<S: Surface>(&self, surface: &mut S, paint: &Paint) {
        draw_history_chart(surface, &self.history, &self.layout, paint);
    }
}

impl Default for ConsistencyAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Draw `history` as a line chart framed by `layout`.
///
/// Newest sample is right-most; `MIN_CONSISTENCY` sits on the baseline
/// and `MAX_CONSISTENCY` on the top edge.
pub fn draw_history_chart<S: Surface>(
    surface: &mut S,
    history: &ConsistencyHistory,
    layout: &ChartLayout,
    paint: &Paint,
) {
    let (surface_width, surface_height) = surface.dimensions();
    let (left, top, right, bottom) = layout.rect(surface_width, surface_height);

    let frame_paint = paint.with_style(PaintStyle::Stroke).with_stroke_width(1);
    draw_rect(surface, left, top, right, bottom, &frame_paint);

    let n = history.len();
    if n == 0 {
        return;
    }
    let plot_w = right - left - 1.0;
    let plot_h = bottom - top - 1.0;
    let step = if history.capacity() > 1 {
        plot_w / (history.capacity() - 1) as f32
    } else {
        0.0
    };
    // Right-align so the newest sample always sits on the right edge.
    let x_start = right - 1.0 - step * (n - 1) as f32;
    let point = |i: usize, v: f32| {
        let v = v.clamp(MIN_CONSISTENCY, MAX_CONSISTENCY);
        (x_start + step * i as f32, bottom - 1.0 - v * plot_h)
    };

    let line_paint = paint.with_style(PaintStyle::Stroke);
    let mut prev = None;
    for (i, v) in history.iter().enumerate() {
        let p = point(i, v);
        draw_line(surface, prev.unwrap_or(p), p, &line_paint);
        prev = Some(p);
    }
}

fn normalise(sum: u64, count: u64) -> f32 {
    if count == 0 {
        return MIN_CONSISTENCY;
    }
    (sum as f64 / (count as f64 * 255.0)) as f32
}

fn analyse(mask: &GrayImage, face: Option<&FaceBox>) -> ConsistencySample {
    let (width, height) = mask.dims();
    let total_pixels = width as u64 * height as u64;
    let total_sum = mask.region_sum(0, 0, width, height);
    let whole_frame = ConsistencySample {
        value: normalise(total_sum, total_pixels),
        face_activity: None,
        background_activity: None,
        region: AggregationRegion::WholeFrame,
    };

    let Some(face) = face.and_then(|f| f.clamp_to(width, height)) else {
        return whole_frame;
    };
    let face_pixels = face.area();
    let background_pixels = total_pixels - face_pixels;
    if background_pixels == 0 {
        return whole_frame;
    }

    let face_sum = mask.region_sum(face.x, face.y, face.right(), face.bottom());
    let background = normalise(total_sum - face_sum, background_pixels);
    ConsistencySample {
        value: background,
        face_activity: Some(normalise(face_sum, face_pixels)),
        background_activity: Some(background),
        region: AggregationRegion::Background,
    }
}
