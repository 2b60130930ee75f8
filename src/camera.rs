use crate::error::{Error, Result};
use anyhow::anyhow;
use nalgebra as na;
use num_traits::Float;
use std::fmt::Debug;

/// Camera intrinsic parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics<F: Float> {
    /// Focal length in x direction (pixels)
    pub fx: F,
    /// Focal length in y direction (pixels)
    pub fy: F,
    /// Principal point x coordinate (pixels)
    pub cx: F,
    /// Principal point y coordinate (pixels)
    pub cy: F,
}

impl<F> CameraIntrinsics<F>
where
    F: Float + na::RealField + Debug,
{
    pub fn new(fx: F, fy: F, cx: F, cy: F) -> Result<Self> {
        let intrinsics = Self { fx, fy, cx, cy };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Builds intrinsics from the row-major calibration matrix
    ///
    /// ```text
    /// | fx  0 cx |
    /// |  0 fy cy |
    /// |  0  0  1 |
    /// ```
    ///
    /// Skew (entry (0, 1)) is ignored.
    pub fn from_matrix(k: &na::Matrix3<F>) -> Result<Self> {
        let bottom = [k[(2, 0)], k[(2, 1)], k[(2, 2)]];
        if bottom != [F::zero(), F::zero(), F::one()] {
            return Err(Error::Intrinsics(format!(
                "bottom row must be [0, 0, 1], got {bottom:?}"
            )));
        }
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    /// Builds intrinsics from a column-major matrix, the layout of
    /// `simd_float3x3` as delivered by AR frameworks.
    pub fn from_columns(columns: [[F; 3]; 3]) -> Result<Self> {
        let k = na::Matrix3::from_fn(|row, col| columns[col][row]);
        Self::from_matrix(&k)
    }

    fn validate(&self) -> Result<()> {
        if !(Float::is_finite(self.fx) && self.fx > F::zero())
            || !(Float::is_finite(self.fy) && self.fy > F::zero())
        {
            return Err(Error::Intrinsics(format!(
                "focal lengths must be positive, got fx={:?} fy={:?}",
                self.fx, self.fy
            )));
        }
        if !Float::is_finite(self.cx) || !Float::is_finite(self.cy) {
            return Err(Error::Intrinsics(format!(
                "principal point must be finite, got ({:?}, {:?})",
                self.cx, self.cy
            )));
        }
        Ok(())
    }

    pub fn matrix(&self) -> na::Matrix3<F> {
        let zero = F::zero();
        let one = F::one();

        na::Matrix3::new(
            self.fx, zero, self.cx, zero, self.fy, self.cy, zero, zero, one,
        )
    }

    /// Converts to another float type, e.g. `f32` ARKit intrinsics to `f64`.
    pub fn cast<G>(&self) -> Result<CameraIntrinsics<G>>
    where
        G: Float + na::RealField + Debug,
    {
        let conv = |v: F| {
            num_traits::cast::<F, G>(v)
                .ok_or_else(|| Error::Intrinsics(format!("{v:?} is not representable")))
        };
        CameraIntrinsics::new(conv(self.fx)?, conv(self.fy)?, conv(self.cx)?, conv(self.cy)?)
    }

    /// Maps a pixel to normalized image-plane coordinates
    pub fn normalize(&self, pixel: &na::Point2<F>) -> na::Point2<F> {
        na::Point2::new(
            (pixel.x - self.cx) / self.fx,
            (pixel.y - self.cy) / self.fy,
        )
    }

    /// Projects a point given in the camera frame onto the image plane
    pub fn project(&self, p_cam: &na::Point3<F>) -> anyhow::Result<na::Point2<F>> {
        // Check if point is in front of camera
        if p_cam.z <= F::zero() {
            return Err(anyhow!("Point is behind camera"));
        }

        Ok(na::Point2::new(
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }
}

/// Change of basis from the vision camera frame (x right, y down, z forward) to
/// the scene-graph camera frame (x right, y up, z backward).
pub fn vision_to_scene<F: na::RealField + Copy>() -> na::Isometry3<F> {
    na::Isometry3::from_parts(
        na::Translation3::identity(),
        na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), F::pi()),
    )
}
