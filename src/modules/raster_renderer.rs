//! PNG overlay renderer.
//!
//! Regions are filled and stroked with their style colours, alpha-blended onto
//! the background image (or a transparent canvas), then labelled with their id
//! in a small bitmap digit font.

use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut};
use imageproc::point::Point;
use tracing::debug;

use crate::error::Result;
use crate::helper::segmentation::RegionContour;
use crate::modules::renderer::{Artifact, ArtifactKind, RenderInput, Renderer};
use crate::modules::style_catalog::{Color, RegionStyle};
use crate::utils::image::encode_png;

/// 3x5 glyphs for 0-9, one row per byte, bit 2 = leftmost column.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111],
    [0b010, 0b110, 0b010, 0b010, 0b111],
    [0b111, 0b001, 0b111, 0b100, 0b111],
    [0b111, 0b001, 0b111, 0b001, 0b111],
    [0b101, 0b101, 0b111, 0b001, 0b001],
    [0b111, 0b100, 0b111, 0b001, 0b111],
    [0b111, 0b100, 0b111, 0b101, 0b111],
    [0b111, 0b001, 0b010, 0b010, 0b010],
    [0b111, 0b101, 0b111, 0b101, 0b111],
    [0b111, 0b101, 0b111, 0b001, 0b111],
];

const GLYPH_W: u32 = 3;
const GLYPH_H: u32 = 5;
const ON: Luma<u8> = Luma([255]);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RasterRenderer;

impl Renderer for RasterRenderer {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Raster
    }

    fn render(&self, input: &RenderInput<'_>) -> Result<Artifact> {
        let (w, h) = (input.shape.width, input.shape.height);
        let mut canvas = match input.background {
            Some(bg) => DynamicImage::ImageRgb8(bg.clone()).to_rgba8(),
            None => RgbaImage::new(w, h),
        };

        for (region_id, contour) in input.contours.iter() {
            let style = input.styles.style_for(region_id);
            let fill = fill_mask(w, h, contour);
            blend_mask(&mut canvas, &fill, style.fill);
            let stroke = stroke_mask(w, h, contour, &style);
            blend_mask(&mut canvas, &stroke, style.stroke);
        }

        for (region_id, contour) in input.contours.iter() {
            let style = input.styles.style_for(region_id);
            match contour.centroid().filter(|(x, y)| x.is_finite() && y.is_finite()) {
                Some(center) => {
                    let label = label_mask(w, h, region_id, center, style.label_font_size);
                    blend_mask(&mut canvas, &label, style.label_color);
                }
                None => debug!(region_id, "no usable centroid, region rendered without label"),
            }
        }

        let payload = encode_png(&DynamicImage::ImageRgba8(canvas))?;
        Ok(Artifact::new(ArtifactKind::Raster, payload))
    }
}

fn to_points(contour: &RegionContour) -> Vec<Point<i32>> {
    contour.points().iter().map(|p| Point::new(p.x, p.y)).collect()
}

fn fill_mask(w: u32, h: u32, contour: &RegionContour) -> GrayImage {
    let mut mask = GrayImage::new(w, h);
    let mut points = to_points(contour);
    // draw_polygon_mut rejects an explicitly closed ring
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() >= 3 {
        draw_polygon_mut(&mut mask, &points, ON);
    }
    mask
}

fn stroke_mask(w: u32, h: u32, contour: &RegionContour, style: &RegionStyle) -> GrayImage {
    let mut mask = GrayImage::new(w, h);
    let points = contour.points();
    let width = style.stroke_width.max(1) as i32;
    let lo = -(width - 1) / 2;
    let hi = width / 2;
    let mut dash = DashCursor::new(style.dash.as_deref().unwrap_or(&[]));

    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        let (ax, ay, bx, by) = (a.x as f32, a.y as f32, b.x as f32, b.y as f32);
        for (s, e) in dash.split(ax, ay, bx, by) {
            for dy in lo..=hi {
                for dx in lo..=hi {
                    let (ox, oy) = (dx as f32, dy as f32);
                    draw_line_segment_mut(&mut mask, (s.0 + ox, s.1 + oy), (e.0 + ox, e.1 + oy), ON);
                }
            }
        }
    }
    mask
}

/// Walks a dash pattern along consecutive segments so the pattern continues across corners.
struct DashCursor<'a> {
    pattern: &'a [u32],
    index: usize,
    remaining: f32,
}

impl<'a> DashCursor<'a> {
    fn new(pattern: &'a [u32]) -> Self {
        let usable = !pattern.is_empty() && pattern.iter().any(|&d| d > 0);
        let pattern = if usable { pattern } else { &[] };
        let remaining = pattern.first().map(|&d| d as f32).unwrap_or(0.0);
        DashCursor { pattern, index: 0, remaining }
    }

    /// Visible sub-segments of `a -> b`.
    fn split(&mut self, ax: f32, ay: f32, bx: f32, by: f32) -> Vec<((f32, f32), (f32, f32))> {
        if self.pattern.is_empty() {
            return vec![((ax, ay), (bx, by))];
        }
        let len = ((bx - ax).powi(2) + (by - ay).powi(2)).sqrt();
        if len == 0.0 {
            return Vec::new();
        }
        let at = |t: f32| (ax + (bx - ax) * t / len, ay + (by - ay) * t / len);

        let mut out = Vec::new();
        let mut pos = 0.0f32;
        while pos < len {
            let step = self.remaining.min(len - pos);
            if self.index % 2 == 0 && step > 0.0 {
                out.push((at(pos), at(pos + step)));
            }
            pos += step;
            self.remaining -= step;
            if self.remaining <= 0.0 {
                self.index = (self.index + 1) % self.pattern.len();
                self.remaining = self.pattern[self.index] as f32;
            }
        }
        out
    }
}

fn label_mask(w: u32, h: u32, region_id: u32, center: (f64, f64), font_size: u32) -> GrayImage {
    let mut mask = GrayImage::new(w, h);
    let text = region_id.to_string();
    let scale = (font_size / (GLYPH_H + 2)).max(1);
    let advance = (GLYPH_W + 1) * scale;
    let text_w = advance * text.len() as u32 - scale;
    let text_h = GLYPH_H * scale;
    let left = center.0.round() as i64 - (text_w / 2) as i64;
    let top = center.1.round() as i64 - (text_h / 2) as i64;

    for (n, ch) in text.bytes().enumerate() {
        let glyph = DIGITS[(ch - b'0') as usize];
        let gx = left + (n as u32 * advance) as i64;
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                for sy in 0..scale {
                    for sx in 0..scale {
                        let x = gx + (col * scale + sx) as i64;
                        let y = top + (row as u32 * scale + sy) as i64;
                        if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
                            mask.put_pixel(x as u32, y as u32, ON);
                        }
                    }
                }
            }
        }
    }
    mask
}

/// Source-over composite of `color` wherever `mask` is set.
fn blend_mask(canvas: &mut RgbaImage, mask: &GrayImage, color: Color) {
    if color.a == 0 {
        return;
    }
    let src_a = color.a as f32 / 255.0;
    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] == 0 {
            continue;
        }
        let dst = *canvas.get_pixel(x, y);
        canvas.put_pixel(x, y, over(color, src_a, dst));
    }
}

fn over(src: Color, src_a: f32, dst: Rgba<u8>) -> Rgba<u8> {
    let dst_a = dst[3] as f32 / 255.0;
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mix = |s: u8, d: u8| {
        let v = (s as f32 * src_a + d as f32 * dst_a * (1.0 - src_a)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        mix(src.r, dst[0]),
        mix(src.g, dst[1]),
        mix(src.b, dst[2]),
        (out_a * 255.0).round() as u8,
    ])
}
