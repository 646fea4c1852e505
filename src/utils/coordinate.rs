use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// One facial landmark in source-image pixel space.
///
/// Landmarks travel as an ordered sequence; the index identifies the
/// anatomical point (dlib 68-point order when a full set is supplied).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
}

impl LandmarkPoint {
    pub const fn new(x: f32, y: f32) -> Self {
        LandmarkPoint { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn to_point(&self) -> Point2<f64> {
        Point2::new(self.x as f64, self.y as f64)
    }
}

/// An integer vertex of a region contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContourPoint {
    pub x: i32,
    pub y: i32,
}

impl ContourPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        ContourPoint { x, y }
    }
}

/// Pixel dimensions of an image, height first like a numpy shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub const fn new(height: u32, width: u32) -> Self {
        ImageShape { height, width }
    }

    pub fn area(&self) -> u64 {
        self.height as u64 * self.width as u64
    }

    /// contains_landmark checks that a landmark lies in the closed image rectangle.
    ///
    /// # Arguments
    /// * `point` - landmark in pixel coordinates
    ///
    /// # Returns
    /// * `bool`
    pub fn contains_landmark(&self, point: &LandmarkPoint) -> bool {
        point.is_finite()
            && point.x >= 0.0
            && point.y >= 0.0
            && point.x <= self.width as f32
            && point.y <= self.height as f32
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
