//! Per-frame preview pipeline.
//!
//! Owns every buffer and model handle; nothing is global. One call to
//! [`FacePipeline::process_frame`] runs a frame to completion:
//! subsample → background model → (recognition callback) → face detection →
//! consistency update.

use crate::background::BackgroundModel;
use crate::consistency::{ConsistencyAnalyzer, ConsistencyError, ConsistencyHistory, ConsistencySample};
use crate::detector::{biggest_face, min_face_size, FaceDetector};
use crate::frame::{subsample, subsampled_dims, FrameError, GrayImage};
use crate::render::{draw_overlay, OverlayOptions, Surface};
use crate::types::FaceBox;
use serde::Serialize;
use thiserror::Error;

pub const CONSISTENCY_SUBSAMPLING_FACTOR: u32 = 8;
pub const RECOGNITION_SUBSAMPLING_FACTOR: u32 = 4;
pub const DEFAULT_LEARNING_RATE: f32 = 0.05;
pub const DEFAULT_MIN_FACE_RATIO: f32 = 0.0;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("consistency: {0}")]
    Consistency(#[from] ConsistencyError),
}

impl PipelineError {
    /// Errors that only cost the current frame; the next frame retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Frame(FrameError::Allocation { .. }))
    }
}

/// Pipeline tunables.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub consistency_factor: u32,
    pub recognition_factor: u32,
    pub learning_rate: f32,
    pub history_capacity: usize,
    /// Minimum face side relative to the subsampled frame height.
    pub min_face_ratio: f32,
    /// Run the detector every N frames; the last box is kept in between.
    pub detect_interval: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            consistency_factor: CONSISTENCY_SUBSAMPLING_FACTOR,
            recognition_factor: RECOGNITION_SUBSAMPLING_FACTOR,
            learning_rate: DEFAULT_LEARNING_RATE,
            history_capacity: crate::consistency::DEFAULT_HISTORY_CAPACITY,
            min_face_ratio: DEFAULT_MIN_FACE_RATIO,
            detect_interval: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No frame seen yet.
    Uninitialized,
    /// Buffers sized for the current resolution, no frame processed at it yet.
    BuffersAllocated,
    /// Steady state.
    Processing,
}

/// Debug counters, owned by the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub faces_found: u64,
    pub detector_errors: u64,
    pub reallocations: u64,
}

/// Receives the recognition-resolution grayscale frame each tick.
pub type FrameCallback = Box<dyn FnMut(&GrayImage) + Send>;

/// Serializable summary of one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub tick: u64,
    pub width: u32,
    pub height: u32,
    pub face: Option<FaceBox>,
    pub consistency: ConsistencySample,
}

impl FrameSummary {
    /// One-line status shown in the overlay banner.
    pub fn status_text(&self) -> String {
        match self.face {
            Some(face) => format!(
                "consistency {:.3}, face {}x{} at ({}, {})",
                self.consistency.value, face.width, face.height, face.x, face.y
            ),
            None => format!("consistency {:.3}, no face", self.consistency.value),
        }
    }
}

/// Everything the renderer needs from one completed frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub summary: FrameSummary,
    pub mask: GrayImage,
    pub history: ConsistencyHistory,
}

impl FrameReport {
    /// Draw the overlay for this frame onto `surface`.
    pub fn render<S: Surface>(&self, surface: &mut S, options: &OverlayOptions) {
        let status = self.summary.status_text();
        draw_overlay(
            surface,
            Some(status.as_str()),
            Some(&self.mask),
            self.summary.face.as_ref(),
            &self.history,
            options,
        );
    }
}

/// Camera-frame → overlay pipeline.
pub struct FacePipeline {
    options: PipelineOptions,
    background: Box<dyn BackgroundModel>,
    detector: Option<Box<dyn FaceDetector>>,
    analyzer: ConsistencyAnalyzer,
    callback: Option<FrameCallback>,
    gray: Option<GrayImage>,
    mask: Option<GrayImage>,
    larger_gray: Option<GrayImage>,
    face: Option<FaceBox>,
    state: PipelineState,
    stats: PipelineStats,
    tick: u64,
}

impl FacePipeline {
    /// Build a pipeline. Pass `None` as detector to run background analysis only.
    pub fn new(
        options: PipelineOptions,
        background: Box<dyn BackgroundModel>,
        detector: Option<Box<dyn FaceDetector>>,
    ) -> Self {
        Self {
            analyzer: ConsistencyAnalyzer::new(options.history_capacity),
            options,
            background,
            detector,
            callback: None,
            gray: None,
            mask: None,
            larger_gray: None,
            face: None,
            state: PipelineState::Uninitialized,
            stats: PipelineStats::default(),
            tick: 0,
        }
    }

    pub fn set_frame_callback(&mut self, callback: Option<FrameCallback>) {
        self.callback = callback;
        if self.callback.is_none() {
            self.larger_gray = None;
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn face(&self) -> Option<&FaceBox> {
        self.face.as_ref()
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    pub fn gray(&self) -> Option<&GrayImage> {
        self.gray.as_ref()
    }

    pub fn analyzer(&self) -> &ConsistencyAnalyzer {
        &self.analyzer
    }

    /// Process one raw camera frame (luma plane, `width` × `height`).
    ///
    /// On error the frame is counted as skipped; state is left so that the
    /// next frame retries allocation.
    pub fn process_frame(&mut self, data: &[u8], width: u32, height: u32) -> Result<FrameReport, PipelineError> {
        match self.run(data, width, height) {
            Ok(report) => {
                self.stats.frames_processed += 1;
                Ok(report)
            }
            Err(e) => {
                self.stats.frames_skipped += 1;
                Err(e)
            }
        }
    }

    fn run(&mut self, data: &[u8], width: u32, height: u32) -> Result<FrameReport, PipelineError> {
        let dims = subsampled_dims(width, height, self.options.consistency_factor)?;
        match self.ensure_buffers(dims) {
            Ok(true) => self.state = PipelineState::BuffersAllocated,
            Ok(false) => {}
            Err(e) => {
                self.state = PipelineState::Uninitialized;
                tracing::warn!(width = dims.0, height = dims.1, error = %e, "frame buffer allocation failed");
                return Err(e.into());
            }
        }

        let gray = self.gray.as_mut().ok_or(FrameError::Allocation { bytes: 0 })?;
        subsample(data, width, height, self.options.consistency_factor, gray)?;

        let mask = self.mask.as_mut().ok_or(FrameError::Allocation { bytes: 0 })?;
        self.background.apply(gray, mask, self.options.learning_rate)?;

        if let Some(callback) = self.callback.as_mut() {
            let larger_dims = subsampled_dims(width, height, self.options.recognition_factor)?;
            ensure_buffer(&mut self.larger_gray, larger_dims)?;
            if let Some(larger) = self.larger_gray.as_mut() {
                subsample(data, width, height, self.options.recognition_factor, larger)?;
                callback(&*larger);
            }
        }

        let interval = self.options.detect_interval.max(1) as u64;
        if self.tick % interval == 0 {
            self.face = self.detect_face(dims);
        }

        let mask = self.mask.as_ref().ok_or(FrameError::Allocation { bytes: 0 })?;
        let consistency = self
            .analyzer
            .process_frame(mask, dims.1, dims.0, self.face.as_ref())?;

        self.state = PipelineState::Processing;
        let report = FrameReport {
            summary: FrameSummary {
                tick: self.tick,
                width: dims.0,
                height: dims.1,
                face: self.face,
                consistency,
            },
            mask: mask.clone(),
            history: self.analyzer.history().clone(),
        };
        self.tick += 1;
        Ok(report)
    }

    /// Run the detector on the current gray frame. Failures cost one frame's
    /// detection only.
    fn detect_face(&mut self, dims: (u32, u32)) -> Option<FaceBox> {
        let detector = self.detector.as_mut()?;
        let gray = self.gray.as_ref()?;
        match detector.detect(gray) {
            Ok(detections) => {
                let min_size = min_face_size(dims.1, self.options.min_face_ratio);
                let face = biggest_face(&detections, dims.0, dims.1, min_size);
                debug_assert!(face.map_or(true, |f| f.fits_within(dims.0, dims.1)));
                if face.is_some() {
                    self.stats.faces_found += 1;
                }
                face
            }
            Err(e) => {
                self.stats.detector_errors += 1;
                tracing::warn!(error = %e, tick = self.tick, "face detection failed; treating as no face");
                None
            }
        }
    }

    /// Returns true when buffers were (re)allocated for a new resolution.
    fn ensure_buffers(&mut self, dims: (u32, u32)) -> Result<bool, FrameError> {
        let gray_new = ensure_buffer(&mut self.gray, dims)?;
        let mask_new = ensure_buffer(&mut self.mask, dims)?;
        if !(gray_new || mask_new) {
            return Ok(false);
        }

        self.stats.reallocations += 1;
        self.background.reset();
        self.face = None;
        tracing::info!(width = dims.0, height = dims.1, "allocated frame buffers");
        Ok(true)
    }
}

/// Reuse `slot` when it already has `dims`, otherwise allocate a fresh buffer.
fn ensure_buffer(slot: &mut Option<GrayImage>, dims: (u32, u32)) -> Result<bool, FrameError> {
    if slot.as_ref().is_some_and(|img| img.dims() == dims) {
        return Ok(false);
    }
    *slot = None;
    *slot = Some(GrayImage::try_new(dims.0, dims.1)?);
    Ok(true)
}
