use image::GrayImage;
use nalgebra as na;

use super::sample_bilinear;

/// Sub-pixel corner refinement settings.
#[derive(Debug, Clone, Copy)]
pub struct SubPixParams {
    /// Half size of the square search window, in pixels
    pub window: u32,
    pub max_iterations: usize,
    /// Stop once a step moves the corner less than this
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            window: 5,
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

/// Refines each corner to the point where the image gradients in its
/// neighbourhood are orthogonal to the vectors pointing at it.
///
/// A corner whose refined position leaves the search window is left unchanged.
pub fn refine_corners(image: &GrayImage, corners: &mut [na::Point2<f32>], params: &SubPixParams) {
    let w = params.window as i32;
    if w == 0 {
        return;
    }
    let sigma_sq = (w as f64 / 2.0).powi(2).max(1.0);

    for corner in corners.iter_mut() {
        let start = na::Vector2::new(corner.x as f64, corner.y as f64);
        let mut q = start;

        for _ in 0..params.max_iterations {
            let mut a = na::Matrix2::<f64>::zeros();
            let mut b = na::Vector2::<f64>::zeros();

            for dy in -w..=w {
                for dx in -w..=w {
                    let p = q + na::Vector2::new(dx as f64, dy as f64);
                    let gx = (sample_bilinear(image, p.x + 1.0, p.y)
                        - sample_bilinear(image, p.x - 1.0, p.y))
                        / 2.0;
                    let gy = (sample_bilinear(image, p.x, p.y + 1.0)
                        - sample_bilinear(image, p.x, p.y - 1.0))
                        / 2.0;
                    let weight = (-((dx * dx + dy * dy) as f64) / (2.0 * sigma_sq)).exp();

                    let g = na::Vector2::new(gx, gy);
                    let ggt = g * g.transpose() * weight;
                    a += ggt;
                    b += ggt * p;
                }
            }

            let Some(a_inv) = a.try_inverse() else {
                break;
            };
            let next = a_inv * b;
            let step = (next - q).norm();
            q = next;
            if step < params.epsilon {
                break;
            }
        }

        let shift = q - start;
        if q.iter().all(|v| v.is_finite()) && shift.x.abs() <= w as f64 && shift.y.abs() <= w as f64
        {
            *corner = na::Point2::new(q.x as f32, q.y as f32);
        }
    }
}
