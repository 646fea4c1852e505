pub mod contour_helper;
pub mod segmentation;
