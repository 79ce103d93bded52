//! Annotated image rendering.
//!
//! Draws each detection as a colored box with a label tab reading
//! `CLASS 0.87`. Shapes go through `imageproc`; the label uses a built-in
//! 5x7 bitmap font so no font file has to ship with the binary.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::error::{AppError, Result};
use crate::models::{BoundingBox, ObjectDetection};

const PALETTE: [[u8; 3]; 8] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 194, 255],
];

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// Render `detections` onto a copy of the image at `path`.
///
/// The result is encoded in the format implied by the source extension.
pub fn render_annotated(path: &Path, detections: &[ObjectDetection]) -> Result<Vec<u8>> {
    let format = ImageFormat::from_path(path).map_err(|e| AppError::detection(path.display(), e))?;
    let mut canvas = image::open(path)
        .map_err(|e| AppError::detection(path.display(), e))?
        .to_rgb8();

    draw_detections(&mut canvas, detections);

    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut buf, format)
        .map_err(|e| AppError::detection(path.display(), e))?;
    Ok(buf.into_inner())
}

fn draw_detections(canvas: &mut RgbImage, detections: &[ObjectDetection]) {
    let (width, height) = canvas.dimensions();
    let thickness = (width.min(height) / 200).max(2);
    let scale = if width.min(height) >= 480 { 2 } else { 1 };

    for detection in detections {
        let color = Rgb(PALETTE[detection.class_id % PALETTE.len()]);
        draw_box(canvas, &detection.bbox, thickness, color);

        let label = format!("{} {:.2}", detection.label, detection.confidence).to_uppercase();
        let tab_w = label.chars().count() as u32 * (GLYPH_WIDTH + 1) * scale + 2 * scale;
        let tab_h = (GLYPH_HEIGHT + 2) * scale;
        let x = detection.bbox.x1.max(0.0) as i32;
        let top = detection.bbox.y1.max(0.0) as i32;
        // above the box when it fits, inside otherwise
        let y = if top >= tab_h as i32 { top - tab_h as i32 } else { top };

        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(tab_w, tab_h), color);
        draw_text(canvas, x + scale as i32, y + scale as i32, &label, scale, Rgb([0, 0, 0]));
    }
}

/// Outline `bbox` with `thickness` nested one-pixel rectangles.
fn draw_box(canvas: &mut RgbImage, bbox: &BoundingBox, thickness: u32, color: Rgb<u8>) {
    let x1 = bbox.x1.max(0.0) as i32;
    let y1 = bbox.y1.max(0.0) as i32;
    let width = (bbox.x2.max(0.0) as i32 - x1).max(1) as u32;
    let height = (bbox.y2.max(0.0) as i32 - y1).max(1) as u32;

    for inset in 0..thickness {
        let (w, h) = (width.saturating_sub(2 * inset), height.saturating_sub(2 * inset));
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at(x1 + inset as i32, y1 + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

fn draw_text(canvas: &mut RgbImage, x: i32, y: i32, text: &str, scale: u32, color: Rgb<u8>) {
    let advance = ((GLYPH_WIDTH + 1) * scale) as i32;
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as i32 * advance;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + (col * scale) as i32;
                let py = y + (row as u32 * scale) as i32;
                draw_filled_rect_mut(canvas, Rect::at(px, py).of_size(scale, scale), color);
            }
        }
    }
}

/// 5x7 glyph rows, most significant of the low 5 bits is the leftmost pixel.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' | '_' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        _ => [0; 7],
    }
}
