//! Face detection boundary, biggest-object policy, and the SCRFD detector.
//!
//! The pipeline talks to [`FaceDetector`] only. [`ScrfdDetector`] runs the
//! SCRFD (Sample and Computation Redistribution for Efficient Face Detection)
//! model through ONNX Runtime with anchor-free decoding and NMS.

use crate::frame::GrayImage;
use crate::types::{Detection, FaceBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model rejected: {0}")]
    InvalidModel(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Face detector over a grayscale frame.
///
/// Implementations may keep state between frames, hence `&mut self`.
/// Returned detections are in `frame` pixel coordinates and may extend
/// past the frame edges.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<Detection>, DetectorError>;
}

/// Pick the single largest detection, clamped into the frame.
///
/// Detections smaller than `min_size` on either side (after clamping) are
/// ignored. Ties keep the earlier detection.
pub fn biggest_face(
    detections: &[Detection],
    frame_width: u32,
    frame_height: u32,
    min_size: u32,
) -> Option<FaceBox> {
    detections
        .iter()
        .filter_map(|d| d.to_face_box(frame_width, frame_height))
        .filter(|b| b.width >= min_size && b.height >= min_size)
        .fold(None, |best: Option<FaceBox>, b| match best {
            Some(prev) if prev.area() >= b.area() => Some(prev),
            _ => Some(b),
        })
}

/// Minimum face side in pixels for a frame of `frame_height` rows.
///
/// `ratio` is the face size relative to frame height; zero disables the
/// filter.
pub fn min_face_size(frame_height: u32, ratio: f32) -> u32 {
    if ratio <= 0.0 {
        return 0;
    }
    (frame_height as f32 * ratio).round().max(0.0) as u32
}

/// Tunables for [`ScrfdDetector`].
#[derive(Debug, Clone, Copy)]
pub struct ScrfdOptions {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for ScrfdOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            intra_threads: 2,
        }
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Session,
    input_height: usize,
    input_width: usize,
    options: ScrfdOptions,
    stride_indices: [StrideOutputIndices; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model. Fails if the file is missing or the model
    /// does not expose score and bbox outputs for all three strides.
    pub fn load(model_path: &Path, options: ScrfdOptions) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(options.intra_threads)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // Models exported without landmarks have 6 outputs, with landmarks 9.
        if output_names.len() < 6 {
            return Err(DetectorError::InvalidModel(format!(
                "SCRFD needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            input_height: SCRFD_INPUT_SIZE,
            input_width: SCRFD_INPUT_SIZE,
            options,
            stride_indices,
        })
    }

    /// Preprocess a grayscale frame into a NCHW float tensor with letterbox padding.
    fn preprocess(&self, frame: &GrayImage) -> (Array4<f32>, LetterboxInfo) {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        let scale_w = self.input_width as f32 / width as f32;
        let scale_h = self.input_height as f32 / height as f32;
        let scale = scale_w.min(scale_h);

        let new_w = ((width as f32 * scale).round() as usize).min(self.input_width);
        let new_h = ((height as f32 * scale).round() as usize).min(self.input_height);
        let pad_x = (self.input_width - new_w) as f32 / 2.0;
        let pad_y = (self.input_height - new_h) as f32 / 2.0;
        let pad_x_start = pad_x.floor() as usize;
        let pad_y_start = pad_y.floor() as usize;

        let mut tensor = Array4::<f32>::from_elem(
            (1, 3, self.input_height, self.input_width),
            0.0, // SCRFD_MEAN normalizes to 0.0
        );

        let inv_scale = 1.0 / scale;
        for y in 0..new_h {
            let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
            let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as u32;
            let y1 = (y0 + 1).min(height as u32 - 1);
            let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);
            let (row0, row1) = (frame.row(y0), frame.row(y1));

            for x in 0..new_w {
                let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
                let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
                let x1 = (x0 + 1).min(width - 1);
                let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

                let top = row0[x0] as f32 * (1.0 - fx) + row0[x1] as f32 * fx;
                let bot = row1[x0] as f32 * (1.0 - fx) + row1[x1] as f32 * fx;
                let pixel = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0);

                let normalized = (pixel - SCRFD_MEAN) / SCRFD_STD;
                let (ty, tx) = (pad_y_start + y, pad_x_start + x);
                // Grayscale → 3-channel
                tensor[[0, 0, ty, tx]] = normalized;
                tensor[[0, 1, ty, tx]] = normalized;
                tensor[[0, 2, ty, tx]] = normalized;
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<Detection>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = self.preprocess(frame);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                self.input_width,
                self.input_height,
                &letterbox,
                self.options.confidence_threshold,
            ));
        }

        let result = nms(all_detections, self.options.nms_threshold);
        tracing::trace!(count = result.len(), "SCRFD detections");
        Ok(result)
    }
}

/// Discover output tensor ordering by name ("score_8", "bbox_16", ...).
///
/// Falls back to the standard positional ordering
/// `[0-2] = scores, [3-5] = bboxes` when names are generic.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3), (1, 4), (2, 5)]
        }
    }
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<Detection> {
    let grid_w = input_width / stride;
    let num_anchors = (input_height / stride) * grid_w * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let anchor_idx = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_cx = (anchor_idx % grid_w) as f32 * s;
        let anchor_cy = (anchor_idx / grid_w) as f32 * s;

        let x1 = (anchor_cx - offsets[0] * s - letterbox.pad_x) / letterbox.scale;
        let y1 = (anchor_cy - offsets[1] * s - letterbox.pad_y) / letterbox.scale;
        let x2 = (anchor_cx + offsets[2] * s - letterbox.pad_x) / letterbox.scale;
        let y2 = (anchor_cy + offsets[3] * s - letterbox.pad_y) / letterbox.scale;

        detections.push(Detection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
        });
    }
    detections
}

/// Non-Maximum Suppression, highest confidence first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two detections.
fn iou(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: conf }
    }

    #[test]
    fn test_biggest_face_picks_largest_area() {
        let dets = vec![
            make_det(0.0, 0.0, 5.0, 5.0, 0.99),
            make_det(10.0, 10.0, 20.0, 20.0, 0.6),
            make_det(40.0, 5.0, 10.0, 10.0, 0.8),
        ];
        let b = biggest_face(&dets, 80, 60, 0).unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (10, 10, 20, 20));
    }

    #[test]
    fn test_biggest_face_uses_clamped_area() {
        // Large but mostly off-frame loses to a smaller fully visible one.
        let dets = vec![
            make_det(75.0, 0.0, 40.0, 40.0, 0.9),
            make_det(10.0, 10.0, 20.0, 20.0, 0.9),
        ];
        let b = biggest_face(&dets, 80, 60, 0).unwrap();
        assert_eq!((b.x, b.y), (10, 10));
        assert!(b.fits_within(80, 60));
    }

    #[test]
    fn test_biggest_face_empty() {
        assert!(biggest_face(&[], 80, 60, 0).is_none());
    }

    #[test]
    fn test_biggest_face_min_size_filter() {
        let dets = vec![make_det(0.0, 0.0, 10.0, 10.0, 0.9)];
        assert!(biggest_face(&dets, 80, 60, 24).is_none());
        assert!(biggest_face(&dets, 80, 60, 10).is_some());
    }

    #[test]
    fn test_min_face_size() {
        assert_eq!(min_face_size(60, 0.4), 24);
        assert_eq!(min_face_size(60, 0.0), 0);
        assert_eq!(min_face_size(60, -1.0), 0);
    }

    #[test]
    fn test_iou_identical() {
        let a = make_det(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = make_det(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_det(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap: 5x10 = 50, union: 100+100-50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_det(5.0, 5.0, 100.0, 100.0, 0.8),
            make_det(0.0, 0.0, 100.0, 100.0, 0.9),
            make_det(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_discover_output_indices_named() {
        let names: Vec<String> = [
            "bbox_8", "score_8", "bbox_16", "score_16", "bbox_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(discover_output_indices(&names), [(1, 0), (3, 2), (5, 4)]);
    }

    #[test]
    fn test_discover_output_indices_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| i.to_string()).collect();
        assert_eq!(discover_output_indices(&names), [(0, 3), (1, 4), (2, 5)]);
    }

    #[test]
    fn test_decode_stride_maps_through_letterbox() {
        // One anchor at grid (1, 0) of stride 8 on a 16x16 input.
        let scores = vec![0.0, 0.0, 0.9, 0.0];
        let mut bboxes = vec![0.0f32; 16];
        bboxes[8..12].copy_from_slice(&[1.0, 0.0, 1.0, 2.0]);
        let letterbox = LetterboxInfo { scale: 2.0, pad_x: 0.0, pad_y: 4.0 };

        let dets = decode_stride(&scores, &bboxes, 8, 16, 16, &letterbox, 0.5);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // anchor (8, 0): x1 = (8-8)/2 = 0, y1 = (0-4)/2 = -2, x2 = 16/2 = 8, y2 = (16-4)/2 = 6
        assert!((d.x - 0.0).abs() < 1e-6);
        assert!((d.y + 2.0).abs() < 1e-6);
        assert!((d.width - 8.0).abs() < 1e-6);
        assert!((d.height - 8.0).abs() < 1e-6);
    }
}
