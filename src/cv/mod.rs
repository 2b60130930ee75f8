//! Image primitives behind marker detection.

pub mod contours;
pub mod geometry;
pub mod homography;
pub mod subpix;
pub mod threshold;

pub use contours::{find_contours, Contour};
pub use homography::{warp_quad, Homography};

use image::GrayImage;

/// Bilinear intensity lookup, clamped to the image. An empty image reads 0.
pub fn sample_bilinear(image: &GrayImage, x: f64, y: f64) -> f64 {
    if image.width() == 0 || image.height() == 0 {
        return 0.0;
    }
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = (x0 + 1.0).min(max_x);
    let y1 = (y0 + 1.0).min(max_y);
    let dx = x - x0;
    let dy = y - y0;

    let at = |px: f64, py: f64| image.get_pixel(px as u32, py as u32)[0] as f64;

    (1.0 - dy) * ((1.0 - dx) * at(x0, y0) + dx * at(x1, y0))
        + dy * ((1.0 - dx) * at(x0, y1) + dx * at(x1, y1))
}
