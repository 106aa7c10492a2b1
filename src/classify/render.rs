//! Overlay composition for classified frames.
//!
//! Region fills and outlines go onto an overlay copy of the frame; status text
//! and centroid numbers go onto a base copy. The two are then alpha blended:
//! `out = alpha * overlay + (1 - alpha) * base`.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut, draw_text_mut};
use imageproc::point::Point;
use std::path::Path;

use crate::roi::geometry::{self, Vertex};
use crate::roi::{LABEL_COLOR, OUTLINE_COLOR};

const OUTLINE_WIDTH: i32 = 4;
const TEXT_X: i32 = 20;
const TEXT_ORIGIN_Y: i32 = 20;
const TEXT_STEP: i32 = 20;
const STATUS_SCALE: f32 = 18.0;
const INDEX_SCALE: f32 = 20.0;

/// What to paint for one active region.
#[derive(Clone, Debug)]
pub struct RegionPaint<'a> {
    pub vertices: &'a [Vertex],
    pub fill: Rgb<u8>,
    /// 1-based index drawn at the centroid.
    pub number: usize,
    /// Stacked status line, if the region has something to report.
    pub caption: Option<(String, Rgb<u8>)>,
}

/// Draws region overlays. Text needs a font; without one only shapes are drawn.
#[derive(Clone, Default)]
pub struct OverlayRenderer {
    font: Option<FontArc>,
}

impl OverlayRenderer {
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Compose all regions onto a copy of `frame`.
    ///
    /// With no regions the frame is returned unchanged.
    pub fn compose(&self, frame: &RgbImage, regions: &[RegionPaint<'_>], alpha: f32) -> RgbImage {
        if regions.is_empty() {
            return frame.clone();
        }

        let mut overlay = frame.clone();
        let mut base = frame.clone();
        let mut text_y = TEXT_ORIGIN_Y;

        for region in regions {
            fill_polygon(&mut overlay, region.vertices, region.fill);
            stroke_polygon(&mut overlay, region.vertices, OUTLINE_COLOR);

            if let Some((text, color)) = &region.caption {
                self.draw_text(&mut base, text, TEXT_X, text_y, STATUS_SCALE, *color);
                text_y += TEXT_STEP;
            }

            // Degenerate (zero-area) regions get no index label.
            if let Some((cx, cy)) = geometry::centroid(region.vertices) {
                let number = region.number.to_string();
                self.draw_text(&mut base, &number, cx as i32, cy as i32, INDEX_SCALE, LABEL_COLOR);
            }
        }

        blend(&overlay, &base, alpha)
    }

    /// `y` is the text baseline.
    fn draw_text(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, scale: f32, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let top = y - (scale * 0.75) as i32;
        draw_text_mut(canvas, color, x, top, PxScale::from(scale), font, text);
    }
}

pub fn load_font(path: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))
}

/// Per-channel weighted sum of two equally sized frames.
pub fn blend(overlay: &RgbImage, base: &RgbImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut out = base.clone();
    for (dst, (top, bottom)) in out.pixels_mut().zip(overlay.pixels().zip(base.pixels())) {
        for c in 0..3 {
            let value = alpha * top[c] as f32 + (1.0 - alpha) * bottom[c] as f32;
            dst[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Vertices without repeats and without an explicit closing vertex.
fn outline_points(vertices: &[Vertex]) -> Vec<Point<i32>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(vertices.len());
    for v in vertices {
        let point = Point::new(v[0], v[1]);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn fill_polygon(canvas: &mut RgbImage, vertices: &[Vertex], color: Rgb<u8>) {
    let points = outline_points(vertices);
    match points.len() {
        0 => {}
        1 => {
            let p = points[0];
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < canvas.width() && (p.y as u32) < canvas.height() {
                canvas.put_pixel(p.x as u32, p.y as u32, color);
            }
        }
        _ => draw_polygon_mut(canvas, &points, color),
    }
}

fn stroke_polygon(canvas: &mut RgbImage, vertices: &[Vertex], color: Rgb<u8>) {
    let points = outline_points(vertices);
    if points.len() < 2 {
        return;
    }
    let half = OUTLINE_WIDTH / 2;
    for i in 0..points.len() {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        for dx in -half..(OUTLINE_WIDTH - half) {
            for dy in -half..(OUTLINE_WIDTH - half) {
                draw_line_segment_mut(
                    canvas,
                    ((a.x + dx) as f32, (a.y + dy) as f32),
                    ((b.x + dx) as f32, (b.y + dy) as f32),
                    color,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: [Vertex; 4] = [[10, 10], [110, 10], [110, 110], [10, 110]];

    #[test]
    fn blend_is_weighted_sum() {
        let overlay = RgbImage::from_pixel(2, 2, Rgb([200, 100, 0]));
        let base = RgbImage::from_pixel(2, 2, Rgb([0, 100, 200]));
        let out = blend(&overlay, &base, 0.25);
        assert_eq!(out.get_pixel(1, 1), &Rgb([50, 100, 150]));
    }

    #[test]
    fn no_regions_leaves_frame_untouched() {
        let frame = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
        let out = OverlayRenderer::default().compose(&frame, &[], 0.15);
        assert_eq!(out, frame);
    }

    #[test]
    fn fill_is_blended_inside_and_outline_is_white() {
        let frame = RgbImage::new(130, 130);
        let region = RegionPaint {
            vertices: &SQUARE,
            fill: Rgb([255, 0, 0]),
            number: 1,
            caption: Some(("Lane 1 : 3".to_string(), Rgb([255, 0, 0]))),
        };
        let out = OverlayRenderer::default().compose(&frame, &[region], 0.15);

        // interior: 0.15 * 255 rounded
        assert_eq!(out.get_pixel(60, 60), &Rgb([38, 0, 0]));
        // on the top edge: 0.15 * white
        assert_eq!(out.get_pixel(60, 10), &Rgb([38, 38, 38]));
        // outside
        assert_eq!(out.get_pixel(125, 125), &Rgb([0, 0, 0]));
    }

    #[test]
    fn closing_vertex_and_single_points_are_tolerated() {
        let mut frame = RgbImage::new(20, 20);
        fill_polygon(&mut frame, &[[2, 2], [10, 2], [10, 10], [2, 2]], Rgb([9, 9, 9]));
        assert_eq!(frame.get_pixel(8, 4), &Rgb([9, 9, 9]));

        fill_polygon(&mut frame, &[[15, 15]], Rgb([7, 7, 7]));
        assert_eq!(frame.get_pixel(15, 15), &Rgb([7, 7, 7]));
        fill_polygon(&mut frame, &[[50, 50]], Rgb([7, 7, 7]));
        stroke_polygon(&mut frame, &[[15, 15]], Rgb([7, 7, 7]));
    }
}
