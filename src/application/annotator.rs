use ab_glyph::{FontVec, PxScale};
use image::Rgb;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::application::font;
use crate::domain::{detection::Detection, stream::Frame};

/// Pixels between the label's bottom and the box's top edge.
const LABEL_GAP: i64 = 3;

/// Fixed drawing settings of one annotator.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationStyle {
    pub color: Rgb<u8>,
    pub thickness: u32,
    pub text_scale: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self { color: Rgb([0, 255, 0]), thickness: 2, text_scale: 1 }
    }
}

enum LabelFont {
    Bitmap,
    Ttf { font: FontVec, scale: PxScale },
}

/// Draws detection boxes and `"{label} {confidence}"` captions onto a copy of
/// a frame.
pub struct Annotator {
    style: AnnotationStyle,
    font: LabelFont,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(AnnotationStyle::default())
    }
}

impl Annotator {
    pub fn new(style: AnnotationStyle) -> Self {
        Self { style, font: LabelFont::Bitmap }
    }

    /// Uses a TrueType font for captions, keeping the bitmap font if the
    /// file is missing or unreadable.
    pub fn with_font_file(mut self, path: &Path, size_px: f32) -> Self {
        match fs::read(path).ok().and_then(|data| FontVec::try_from_vec(data).ok()) {
            Some(font) => {
                info!("Loaded label font from {}", path.display());
                self.font = LabelFont::Ttf { font, scale: PxScale::from(size_px) };
            }
            None => warn!("Could not load font {}, falling back to bitmap", path.display()),
        }
        self
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    /// Returns a new frame with every detection drawn. `frame` is untouched.
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        let mut out = frame.clone();
        for det in detections {
            self.draw_detection(&mut out, det);
        }
        out
    }

    fn draw_detection(&self, img: &mut Frame, det: &Detection) {
        let (w, h) = img.dimensions();
        let Some((x1, y1, x2, y2)) = clamp_box(det, w, h) else {
            return;
        };

        for t in 0..self.style.thickness {
            let rw = (x2 - x1 + 1).saturating_sub(2 * t);
            let rh = (y2 - y1 + 1).saturating_sub(2 * t);
            if rw == 0 || rh == 0 {
                break;
            }
            let rect = Rect::at((x1 + t) as i32, (y1 + t) as i32).of_size(rw, rh);
            draw_hollow_rect_mut(img, rect, self.style.color);
        }

        let text = format_label(&det.label, det.confidence);
        let (tw, th) = self.text_size(&text);
        let (tx, ty) = label_origin((x1, y1), tw, th, self.style.thickness, (w, h));
        self.draw_text(img, tx, ty, &text);
    }

    fn text_size(&self, text: &str) -> (u32, u32) {
        match &self.font {
            LabelFont::Bitmap => font::text_size(text, self.style.text_scale),
            LabelFont::Ttf { font, scale } => text_size(*scale, font, text),
        }
    }

    fn draw_text(&self, img: &mut Frame, x: i64, y: i64, text: &str) {
        match &self.font {
            LabelFont::Bitmap => {
                font::draw_text(img, x, y, text, self.style.color, self.style.text_scale)
            }
            LabelFont::Ttf { font, scale } => {
                draw_text_mut(img, self.style.color, x as i32, y as i32, *scale, font, text)
            }
        }
    }
}

/// Caption text for one detection, confidence rounded to two decimals.
pub fn format_label(label: &str, confidence: f32) -> String {
    format!("{} {:.2}", label, confidence)
}

/// Box corners clamped into the frame, inclusive. `None` when nothing of the
/// box is visible.
fn clamp_box(det: &Detection, w: u32, h: u32) -> Option<(u32, u32, u32, u32)> {
    if w == 0 || h == 0 {
        return None;
    }
    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);
    if det.x2 < 0.0 || det.y2 < 0.0 || det.x1 > max_x || det.y1 > max_y {
        return None;
    }
    if !(det.x1.is_finite() && det.y1.is_finite() && det.x2.is_finite() && det.y2.is_finite()) {
        return None;
    }

    let x1 = det.x1.clamp(0.0, max_x) as u32;
    let y1 = det.y1.clamp(0.0, max_y) as u32;
    let x2 = det.x2.clamp(0.0, max_x) as u32;
    let y2 = det.y2.clamp(0.0, max_y) as u32;
    if x2 < x1 || y2 < y1 {
        return None;
    }
    Some((x1, y1, x2, y2))
}

/// Top-left corner for a caption of size `tw`x`th`. Sits right above the box;
/// when that would leave the frame it moves just inside the box's top edge.
/// Always clamped so the caption starts inside the frame.
fn label_origin(
    (x1, y1): (u32, u32),
    tw: u32,
    th: u32,
    thickness: u32,
    (w, h): (u32, u32),
) -> (i64, i64) {
    let above = y1 as i64 - th as i64 - LABEL_GAP;
    let y = if above >= 0 { above } else { y1 as i64 + thickness as i64 + 1 };
    let y = y.min(h as i64 - th as i64).max(0);
    let x = (x1 as i64).min(w as i64 - tw as i64).max(0);
    (x, y)
}
