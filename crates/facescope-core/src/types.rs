use serde::{Deserialize, Serialize};

/// Raw detector output in frame pixel coordinates, possibly outside the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clamp into a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the detection is left inside the frame.
    pub fn to_face_box(&self, frame_width: u32, frame_height: u32) -> Option<FaceBox> {
        let x0 = self.x.floor().clamp(0.0, frame_width as f32);
        let y0 = self.y.floor().clamp(0.0, frame_height as f32);
        let x1 = (self.x + self.width).ceil().clamp(0.0, frame_width as f32);
        let y1 = (self.y + self.height).ceil().clamp(0.0, frame_height as f32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(FaceBox {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            confidence: Some(self.confidence),
        })
    }
}

/// Axis-aligned face rectangle in subsampled-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Detector score, when the box came from a detector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: None,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Right edge, exclusive.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge, exclusive.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Whether the box lies entirely within a `width` × `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Intersection with a `width` × `height` frame, `None` if empty.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceBox> {
        let x0 = self.x.min(width);
        let y0 = self.y.min(height);
        let x1 = self.right().min(width);
        let y1 = self.bottom().min(height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(FaceBox {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
            confidence: self.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: 0.9 }
    }

    #[test]
    fn test_detection_inside_frame_is_kept() {
        let b = det(2.0, 3.0, 10.0, 12.0).to_face_box(80, 60).unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (2, 3, 10, 12));
        assert_eq!(b.confidence, Some(0.9));
    }

    #[test]
    fn test_detection_is_clamped_into_frame() {
        let b = det(-5.0, 50.0, 20.0, 20.0).to_face_box(80, 60).unwrap();
        assert_eq!((b.x, b.y, b.width, b.height), (0, 50, 15, 10));
        assert!(b.fits_within(80, 60));
    }

    #[test]
    fn test_detection_outside_frame_is_dropped() {
        assert!(det(100.0, 10.0, 5.0, 5.0).to_face_box(80, 60).is_none());
        assert!(det(-20.0, -20.0, 10.0, 10.0).to_face_box(80, 60).is_none());
    }

    #[test]
    fn test_face_box_clamp() {
        let b = FaceBox::new(70, 50, 20, 20);
        assert!(!b.fits_within(80, 60));
        let c = b.clamp_to(80, 60).unwrap();
        assert_eq!((c.x, c.y, c.width, c.height), (70, 50, 10, 10));
        assert!(FaceBox::new(90, 10, 5, 5).clamp_to(80, 60).is_none());
    }

    #[test]
    fn test_degenerate_box_clamps_to_none() {
        assert!(FaceBox::new(1, 1, 0, 4).clamp_to(80, 60).is_none());
        assert!(FaceBox::new(1, 1, 0, 4).fits_within(80, 60));
        assert_eq!(FaceBox::new(1, 1, 2, 3).area(), 6);
    }
}
