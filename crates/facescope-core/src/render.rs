//! Drawing surface, paint state, and the preview overlay.
//!
//! The overlay mirrors what the live view shows: a status banner centred at
//! the top, the foreground mask in the top-left corner on a black backing,
//! the consistency chart, and the face box scaled up to surface coordinates.

use crate::consistency::{draw_history_chart, ChartLayout, ConsistencyHistory};
use crate::frame::GrayImage;
use crate::types::FaceBox;
use ab_glyph::{FontArc, PxScale};
use image::{Pixel, Rgba};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size, Canvas,
};
use imageproc::rect::Rect;

pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Top offset of the status banner, in pixels.
const BANNER_TOP: i32 = 2;

/// Any RGBA canvas the overlay can be drawn onto.
pub trait Surface: Canvas<Pixel = Rgba<u8>> {}

impl<C: Canvas<Pixel = Rgba<u8>>> Surface for C {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintStyle {
    Fill,
    Stroke,
}

/// Paint state passed to every drawing call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Rgba<u8>,
    /// Line width in pixels; 0 draws hairlines (1 px).
    pub stroke_width: u32,
    pub style: PaintStyle,
    /// Glyph height in pixels for text.
    pub text_size: f32,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: BLACK,
            stroke_width: 0,
            style: PaintStyle::Fill,
            text_size: 20.0,
        }
    }
}

impl Paint {
    pub fn with_color(mut self, color: Rgba<u8>) -> Self {
        self.color = color;
        self
    }

    pub fn with_stroke_width(mut self, width: u32) -> Self {
        self.stroke_width = width;
        self
    }

    pub fn with_style(mut self, style: PaintStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_text_size(mut self, size: f32) -> Self {
        self.text_size = size;
        self
    }

    fn line_width(&self) -> i32 {
        self.stroke_width.max(1) as i32
    }
}

/// Rectangle spanning two opposite corners, in any order. `None` if empty.
fn rect_from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Option<Rect> {
    let (left, right) = (x0.min(x1).round() as i32, x0.max(x1).round() as i32);
    let (top, bottom) = (y0.min(y1).round() as i32, y0.max(y1).round() as i32);
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}

/// Draw an axis-aligned rectangle given two opposite corners, in any order.
///
/// Strokes grow inwards from the outline by `stroke_width` pixels.
pub fn draw_rect<S: Surface>(surface: &mut S, x0: f32, y0: f32, x1: f32, y1: f32, paint: &Paint) {
    let Some(rect) = rect_from_corners(x0, y0, x1, y1) else {
        return;
    };
    match paint.style {
        PaintStyle::Fill => draw_filled_rect_mut(surface, rect, paint.color),
        PaintStyle::Stroke => {
            for inset in 0..paint.line_width() {
                let (w, h) = (rect.width() as i32 - 2 * inset, rect.height() as i32 - 2 * inset);
                if w <= 0 || h <= 0 {
                    break;
                }
                let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
                draw_hollow_rect_mut(surface, ring, paint.color);
            }
        }
    }
}

/// Line segment with a square brush of `paint.stroke_width`.
pub fn draw_line<S: Surface>(surface: &mut S, from: (f32, f32), to: (f32, f32), paint: &Paint) {
    let w = paint.line_width();
    let steep = (to.1 - from.1).abs() > (to.0 - from.0).abs();
    for offset in (-(w - 1) / 2)..=(w / 2) {
        let o = offset as f32;
        let (a, b) = if steep {
            ((from.0 + o, from.1), (to.0 + o, to.1))
        } else {
            ((from.0, from.1 + o), (to.0, to.1 + o))
        };
        draw_line_segment_mut(surface, a, b, paint.color);
    }
}

/// Draw an 8-bit mask as an alpha-only bitmap tinted with `paint.color`.
pub fn draw_alpha_mask<S: Surface>(surface: &mut S, mask: &GrayImage, left: i64, top: i64, paint: &Paint) {
    let (sw, sh) = surface.dimensions();
    for (y, row) in mask.rows().enumerate() {
        let sy = top + y as i64;
        if sy < 0 || sy >= sh as i64 {
            continue;
        }
        for (x, &alpha) in row.iter().enumerate() {
            let sx = left + x as i64;
            if alpha == 0 || sx < 0 || sx >= sw as i64 {
                continue;
            }
            let mut color = paint.color;
            color[3] = ((paint.color[3] as u32 * alpha as u32) / 255) as u8;
            let mut px = surface.get_pixel(sx as u32, sy as u32);
            px.blend(&color);
            surface.draw_pixel(sx as u32, sy as u32, px);
        }
    }
}

/// Left edge that centres a `text_width` wide banner on the surface.
pub fn banner_left(surface_width: u32, text_width: u32) -> i32 {
    (surface_width as i32 - text_width as i32) / 2
}

/// Draw `text` centred horizontally near the top edge.
pub fn draw_banner<S: Surface>(surface: &mut S, text: &str, font: &FontArc, paint: &Paint) {
    let scale = PxScale::from(paint.text_size);
    let (text_width, _) = text_size(scale, font, text);
    let left = banner_left(surface.dimensions().0, text_width);
    draw_text_mut(surface, paint.color, left, BANNER_TOP, scale, font, text);
}

/// Overlay settings.
#[derive(Clone)]
pub struct OverlayOptions {
    /// Flip face boxes horizontally (front-facing camera).
    pub mirror: bool,
    pub show_mask: bool,
    pub show_chart: bool,
    pub face_paint: Paint,
    pub chart_paint: Paint,
    pub text_paint: Paint,
    pub chart_layout: ChartLayout,
    /// Banner font; without one the status text is not drawn.
    pub font: Option<FontArc>,
}

impl Default for OverlayOptions {
    fn default() -> Self {
        Self {
            mirror: true,
            show_mask: true,
            show_chart: true,
            face_paint: Paint::default()
                .with_color(RED)
                .with_stroke_width(2)
                .with_style(PaintStyle::Stroke),
            chart_paint: Paint::default().with_color(RED).with_stroke_width(2),
            text_paint: Paint::default().with_color(RED).with_text_size(20.0),
            chart_layout: ChartLayout::default(),
            font: None,
        }
    }
}

/// Map a face box from subsampled-frame to surface coordinates.
///
/// Returns `(x0, y0, x1, y1)`. With `mirror`, x is reflected so that
/// `x0 = surface_width - x * scale_x`.
pub fn face_rect_on_surface(
    face: &FaceBox,
    frame_dims: (u32, u32),
    surface_dims: (u32, u32),
    mirror: bool,
) -> (f32, f32, f32, f32) {
    let scale_x = surface_dims.0 as f32 / frame_dims.0.max(1) as f32;
    let scale_y = surface_dims.1 as f32 / frame_dims.1.max(1) as f32;
    let (left, right) = (face.x as f32 * scale_x, face.right() as f32 * scale_x);
    let (top, bottom) = (face.y as f32 * scale_y, face.bottom() as f32 * scale_y);
    if mirror {
        let w = surface_dims.0 as f32;
        (w - left, top, w - right, bottom)
    } else {
        (left, top, right, bottom)
    }
}

/// Draw the full preview overlay for the latest frame.
pub fn draw_overlay<S: Surface>(
    surface: &mut S,
    status: Option<&str>,
    mask: Option<&GrayImage>,
    face: Option<&FaceBox>,
    history: &ConsistencyHistory,
    options: &OverlayOptions,
) {
    if let (Some(text), Some(font)) = (status, options.font.as_ref()) {
        draw_banner(surface, text, font, &options.text_paint);
    }

    if options.show_mask {
        if let Some(mask) = mask {
            let backing = Paint::default().with_color(BLACK);
            draw_rect(surface, 0.0, 0.0, mask.width() as f32, mask.height() as f32, &backing);
            draw_alpha_mask(surface, mask, 0, 0, &Paint::default().with_color(WHITE));
        }
    }

    if options.show_chart {
        draw_history_chart(surface, history, &options.chart_layout, &options.chart_paint);
    }

    if let (Some(face), Some(mask)) = (face, mask) {
        let (x0, y0, x1, y1) = face_rect_on_surface(face, mask.dims(), surface.dimensions(), options.mirror);
        draw_rect(surface, x0, y0, x1, y1, &options.face_paint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn canvas(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]))
    }

    #[test]
    fn test_fill_rect_covers_area() {
        let mut img = canvas(8, 8);
        draw_rect(&mut img, 2.0, 2.0, 5.0, 4.0, &Paint::default().with_color(RED));
        assert_eq!(*img.get_pixel(2, 2), RED);
        assert_eq!(*img.get_pixel(4, 3), RED);
        assert_ne!(*img.get_pixel(5, 3), RED);
        assert_ne!(*img.get_pixel(2, 4), RED);
    }

    #[test]
    fn test_stroke_rect_leaves_interior() {
        let mut img = canvas(10, 10);
        let paint = Paint::default().with_color(RED).with_style(PaintStyle::Stroke);
        draw_rect(&mut img, 8.0, 8.0, 1.0, 1.0, &paint);
        assert_eq!(*img.get_pixel(1, 1), RED);
        assert_eq!(*img.get_pixel(7, 4), RED);
        assert_ne!(*img.get_pixel(4, 4), RED);
    }

    #[test]
    fn test_thick_stroke_grows_inwards() {
        let mut img = canvas(10, 10);
        let paint = Paint::default()
            .with_color(RED)
            .with_style(PaintStyle::Stroke)
            .with_stroke_width(2);
        draw_rect(&mut img, 0.0, 0.0, 10.0, 10.0, &paint);
        assert_eq!(*img.get_pixel(1, 5), RED);
        assert_ne!(*img.get_pixel(2, 5), RED);
    }

    #[test]
    fn test_empty_rect_draws_nothing() {
        let mut img = canvas(4, 4);
        draw_rect(&mut img, 2.0, 0.0, 2.0, 4.0, &Paint::default().with_color(RED));
        assert!(img.pixels().all(|p| *p != RED));
    }

    #[test]
    fn test_offscreen_drawing_is_clipped() {
        let mut img = canvas(4, 4);
        draw_line(&mut img, (-10.0, -10.0), (20.0, 20.0), &Paint::default().with_color(WHITE));
        assert_eq!(*img.get_pixel(0, 0), WHITE);
        assert_eq!(*img.get_pixel(3, 3), WHITE);
    }

    #[test]
    fn test_line_endpoints_drawn() {
        let mut img = canvas(10, 5);
        draw_line(&mut img, (1.0, 1.0), (8.0, 3.0), &Paint::default().with_color(WHITE));
        assert_eq!(*img.get_pixel(1, 1), WHITE);
        assert_eq!(*img.get_pixel(8, 3), WHITE);
    }

    #[test]
    fn test_alpha_mask_blends_by_value() {
        let mut img = RgbaImage::from_pixel(2, 1, BLACK);
        let mask = GrayImage::from_raw(vec![0, 255], 2, 1, 2).unwrap();
        draw_alpha_mask(&mut img, &mask, 0, 0, &Paint::default().with_color(WHITE));
        assert_eq!(*img.get_pixel(0, 0), BLACK);
        assert_eq!(*img.get_pixel(1, 0), WHITE);
    }

    #[test]
    fn test_alpha_mask_clipped_to_surface() {
        let mut img = RgbaImage::from_pixel(2, 2, BLACK);
        let mask = GrayImage::filled(4, 4, 255);
        draw_alpha_mask(&mut img, &mask, -1, 1, &Paint::default().with_color(WHITE));
        assert_eq!(*img.get_pixel(0, 1), WHITE);
        assert_eq!(*img.get_pixel(0, 0), BLACK);
    }

    #[test]
    fn test_banner_is_centred() {
        assert_eq!(banner_left(640, 200), 220);
        assert_eq!(banner_left(100, 120), -10);
    }

    #[test]
    fn test_face_rect_mirrored() {
        let face = FaceBox::new(10, 5, 20, 10);
        let (x0, y0, x1, y1) = face_rect_on_surface(&face, (80, 60), (640, 480), true);
        assert!((x0 - (640.0 - 80.0)).abs() < 1e-4);
        assert!((x1 - (640.0 - 240.0)).abs() < 1e-4);
        assert!((y0 - 40.0).abs() < 1e-4);
        assert!((y1 - 120.0).abs() < 1e-4);

        let (x0, _, x1, _) = face_rect_on_surface(&face, (80, 60), (640, 480), false);
        assert!((x0 - 80.0).abs() < 1e-4);
        assert!((x1 - 240.0).abs() < 1e-4);
    }

    #[test]
    fn test_overlay_draws_mask_and_face() {
        let mut img = canvas(64, 48);
        let mask = GrayImage::filled(8, 6, 255);
        let face = FaceBox::new(2, 2, 2, 2);
        let history = ConsistencyHistory::new(10);
        let options = OverlayOptions {
            mirror: false,
            ..OverlayOptions::default()
        };
        draw_overlay(&mut img, Some("status"), Some(&mask), Some(&face), &history, &options);

        // Mask corner is white, face box edge (scale 8) is red.
        assert_eq!(*img.get_pixel(0, 0), WHITE);
        assert_eq!(*img.get_pixel(16, 16), RED);
        // No font configured: the banner row right of the mask is untouched.
        assert_eq!(*img.get_pixel(32, 3), Rgba([10, 20, 30, 255]));
    }
}
