use serde::{Deserialize, Serialize};

use crate::utils::coordinate::ContourPoint;

/// Axis-aligned bounds of a point set, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
    pub width: i32,
    pub height: i32,
}

/// polygon_area returns the absolute shoelace area of a closed polygon.
///
/// # Arguments
/// * `points` - polygon vertices, closing edge implied
///
/// # Returns
/// * `f64`
pub fn polygon_area(points: &[ContourPoint]) -> f64 {
    signed_area(points).abs()
}

fn signed_area(points: &[ContourPoint]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut acc: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        acc += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    acc as f64 / 2.0
}

/// polygon_centroid computes the area-weighted centroid of a polygon.
///
/// Polygons with zero area fall back to the mean of their vertices.
/// Returns `None` only for an empty slice.
///
/// # Arguments
/// * `points` - polygon vertices, closing edge implied
///
/// # Returns
/// * `Option<(f64, f64)>`
pub fn polygon_centroid(points: &[ContourPoint]) -> Option<(f64, f64)> {
    if points.is_empty() {
        return None;
    }
    let area = signed_area(points);
    if area != 0.0 {
        let (mut cx, mut cy) = (0.0f64, 0.0f64);
        for (i, p) in points.iter().enumerate() {
            let q = points[(i + 1) % points.len()];
            let cross = (p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64) as f64;
            cx += (p.x + q.x) as f64 * cross;
            cy += (p.y + q.y) as f64 * cross;
        }
        return Some((cx / (6.0 * area), cy / (6.0 * area)));
    }
    let n = points.len() as f64;
    let sx: f64 = points.iter().map(|p| p.x as f64).sum();
    let sy: f64 = points.iter().map(|p| p.y as f64).sum();
    Some((sx / n, sy / n))
}

pub fn bounding_box(points: &[ContourPoint]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut x_min, mut y_min, mut x_max, mut y_max) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        x_min = x_min.min(p.x);
        y_min = y_min.min(p.y);
        x_max = x_max.max(p.x);
        y_max = y_max.max(p.y);
    }
    Some(BoundingBox {
        x_min,
        y_min,
        x_max,
        y_max,
        width: x_max - x_min,
        height: y_max - y_min,
    })
}
