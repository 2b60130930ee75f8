use anyhow::{anyhow, Result};
use image::{GrayImage, Luma};
use nalgebra as na;

use super::sample_bilinear;

/// A plane-to-plane projective transform, normalised so `h33 == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography(na::Matrix3<f64>);

impl Homography {
    /// Exact homography mapping four source points onto four destination points.
    pub fn from_correspondences(
        src: &[na::Point2<f64>; 4],
        dst: &[na::Point2<f64>; 4],
    ) -> Result<Self> {
        let mut a = na::SMatrix::<f64, 8, 8>::zeros();
        let mut b = na::SVector::<f64, 8>::zeros();

        for (i, (s, d)) in src.iter().zip(dst).enumerate() {
            let r = 2 * i;
            a.row_mut(r).copy_from_slice(&[
                s.x,
                s.y,
                1.0,
                0.0,
                0.0,
                0.0,
                -d.x * s.x,
                -d.x * s.y,
            ]);
            a.row_mut(r + 1).copy_from_slice(&[
                0.0,
                0.0,
                0.0,
                s.x,
                s.y,
                1.0,
                -d.y * s.x,
                -d.y * s.y,
            ]);
            b[r] = d.x;
            b[r + 1] = d.y;
        }

        let h = a
            .lu()
            .solve(&b)
            .ok_or(anyhow!("Degenerate point configuration"))?;
        if h.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Homography is not finite"));
        }

        Ok(Self(na::Matrix3::new(
            h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0,
        )))
    }

    pub fn from_matrix(m: na::Matrix3<f64>) -> Result<Self> {
        let scale = m[(2, 2)];
        if scale.abs() < f64::EPSILON {
            return Err(anyhow!("Homography has h33 == 0"));
        }
        Ok(Self(m / scale))
    }

    pub fn matrix(&self) -> &na::Matrix3<f64> {
        &self.0
    }

    pub fn try_inverse(&self) -> Result<Self> {
        let inv = self
            .0
            .try_inverse()
            .ok_or(anyhow!("Homography is singular"))?;
        Self::from_matrix(inv)
    }

    /// Maps a point, failing for points sent to infinity.
    pub fn apply(&self, p: &na::Point2<f64>) -> Result<na::Point2<f64>> {
        let v = self.0 * na::Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < f64::EPSILON {
            return Err(anyhow!("Point maps to infinity"));
        }
        Ok(na::Point2::new(v.x / v.z, v.y / v.z))
    }
}

/// Resamples the quadrilateral `quad` into a `size`x`size` patch, corner 0 at
/// the patch's top-left and corner 2 at its bottom-right.
pub fn warp_quad(src: &GrayImage, quad: &[na::Point2<f32>; 4], size: u32) -> Result<GrayImage> {
    if size < 2 {
        return Err(anyhow!("Patch size must be at least 2, got {size}"));
    }
    let edge = (size - 1) as f64;
    let patch = [
        na::Point2::new(0.0, 0.0),
        na::Point2::new(edge, 0.0),
        na::Point2::new(edge, edge),
        na::Point2::new(0.0, edge),
    ];
    let target = quad.map(|p| na::Point2::new(p.x as f64, p.y as f64));
    let h = Homography::from_correspondences(&patch, &target)?;

    let mut out = GrayImage::new(size, size);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let p = h.apply(&na::Point2::new(x as f64, y as f64))?;
        *px = Luma([sample_bilinear(src, p.x, p.y).round() as u8]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pts(coords: [(f64, f64); 4]) -> [na::Point2<f64>; 4] {
        coords.map(|(x, y)| na::Point2::new(x, y))
    }

    #[test]
    fn test_maps_correspondences() -> Result<()> {
        let src = pts([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        let dst = pts([(10.0, 12.0), (52.0, 8.0), (60.0, 47.0), (7.0, 40.0)]);
        let h = Homography::from_correspondences(&src, &dst)?;

        for (s, d) in src.iter().zip(&dst) {
            assert_relative_eq!(h.apply(s)?, *d, epsilon = 1e-9);
        }

        let inv = h.try_inverse()?;
        for (s, d) in src.iter().zip(&dst) {
            assert_relative_eq!(inv.apply(d)?, *s, epsilon = 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_degenerate_points() {
        let src = pts([(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let dst = pts([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        assert!(Homography::from_correspondences(&src, &dst).is_err());
    }

    #[test]
    fn test_warp_axis_aligned() -> Result<()> {
        // Left half dark, right half bright
        let img = GrayImage::from_fn(40, 40, |x, _| Luma([if x < 20 { 0 } else { 200 }]));
        let quad = [
            na::Point2::new(10.0, 10.0),
            na::Point2::new(29.0, 10.0),
            na::Point2::new(29.0, 29.0),
            na::Point2::new(10.0, 29.0),
        ];

        let patch = warp_quad(&img, &quad, 20)?;
        assert_eq!(patch.get_pixel(0, 5)[0], 0);
        assert_eq!(patch.get_pixel(19, 5)[0], 200);
        Ok(())
    }
}
