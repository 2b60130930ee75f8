//! Pose of a single square marker from its four image corners.

mod refine;

use nalgebra as na;
use thiserror::Error;

use crate::camera::CameraIntrinsics;
use crate::cv::Homography;
use crate::detector::{Marker, MarkerCorners};
use refine::Reprojection;

#[derive(Debug, Error, PartialEq)]
pub enum PoseError {
    #[error("Marker size must be positive and finite, got {0}")]
    InvalidMarkerSize(f64),

    #[error("Degenerate marker corners: {0}")]
    Degenerate(String),

    #[error("Marker lies behind the camera")]
    BehindCamera,
}

/// Corner positions of a marker of side `size` in its own frame, matching the
/// corner order of [`Marker`]. The marker's front face looks along +z.
pub fn model_points(size: f64) -> [na::Point3<f64>; 4] {
    let h = size / 2.0;
    [
        na::Point3::new(-h, h, 0.0),
        na::Point3::new(h, h, 0.0),
        na::Point3::new(h, -h, 0.0),
        na::Point3::new(-h, -h, 0.0),
    ]
}

/// Marker-to-camera transform in the vision camera frame (x right, y down,
/// z forward).
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerPose {
    pub id: i32,
    pub rotation: na::UnitQuaternion<f64>,
    pub translation: na::Vector3<f64>,
    /// RMS corner reprojection error in pixels
    pub reprojection_error: f64,
}

impl MarkerPose {
    /// Rodrigues rotation vector
    pub fn rvec(&self) -> na::Vector3<f64> {
        self.rotation.scaled_axis()
    }

    pub fn isometry(&self) -> na::Isometry3<f64> {
        na::Isometry3::from_parts(na::Translation3::from(self.translation), self.rotation)
    }
}

/// Planar pose solver for markers of one physical size.
#[derive(Debug, Clone)]
pub struct PoseSolver {
    intrinsics: CameraIntrinsics<f64>,
    marker_size: f64,
    pub max_iterations: usize,
}

impl PoseSolver {
    pub fn new(intrinsics: CameraIntrinsics<f64>, marker_size: f64) -> Result<Self, PoseError> {
        if !marker_size.is_finite() || marker_size <= 0.0 {
            return Err(PoseError::InvalidMarkerSize(marker_size));
        }
        Ok(Self {
            intrinsics,
            marker_size,
            max_iterations: 20,
        })
    }

    pub fn marker_size(&self) -> f64 {
        self.marker_size
    }

    pub fn solve(&self, marker: &Marker) -> Result<MarkerPose, PoseError> {
        let (rotation, translation, reprojection_error) = self.solve_corners(&marker.corners)?;
        Ok(MarkerPose {
            id: marker.id,
            rotation,
            translation,
            reprojection_error,
        })
    }

    /// Rotation, translation and RMS reprojection error for four image corners.
    pub fn solve_corners(
        &self,
        corners: &MarkerCorners,
    ) -> Result<(na::UnitQuaternion<f64>, na::Vector3<f64>, f64), PoseError> {
        let observed = corners.map(|c| na::Point2::new(c.x as f64, c.y as f64));
        if quad_area(&observed) < 1.0 {
            return Err(PoseError::Degenerate(
                "corners enclose less than one pixel".to_string(),
            ));
        }
        let model = model_points(self.marker_size);

        let (rotation, translation) = self.initial_pose(&model, &observed)?;

        let problem = Reprojection {
            intrinsics: &self.intrinsics,
            model: &model,
            observed: &observed,
        };
        if problem.residuals(&rotation, &translation).is_none() {
            return Err(PoseError::BehindCamera);
        }

        Ok(problem.refine(rotation, translation, self.max_iterations))
    }

    /// Closed-form pose from the homography between the marker plane and the
    /// normalized image plane.
    fn initial_pose(
        &self,
        model: &[na::Point3<f64>; 4],
        observed: &[na::Point2<f64>; 4],
    ) -> Result<(na::UnitQuaternion<f64>, na::Vector3<f64>), PoseError> {
        let plane = model.map(|p| na::Point2::new(p.x, p.y));
        let normalized = observed.map(|p| self.intrinsics.normalize(&p));

        let h = Homography::from_correspondences(&plane, &normalized)
            .map_err(|e| PoseError::Degenerate(e.to_string()))?;
        let h = h.matrix();

        let h1 = h.column(0).into_owned();
        let h2 = h.column(1).into_owned();
        let h3 = h.column(2).into_owned();

        let norm = (h1.norm() + h2.norm()) / 2.0;
        if norm < f64::EPSILON {
            return Err(PoseError::Degenerate("homography has no scale".to_string()));
        }
        // The marker has to be in front of the camera
        let scale = if h3.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

        let r1 = h1 * scale;
        let r2 = h2 * scale;
        let translation = h3 * scale;
        let r3 = r1.cross(&r2);

        let rotation = nearest_rotation(&na::Matrix3::from_columns(&[r1, r2, r3]))?;
        Ok((rotation, translation))
    }
}

fn quad_area(quad: &[na::Point2<f64>; 4]) -> f64 {
    let twice: f64 = (0..4)
        .map(|i| {
            let (a, b) = (quad[i], quad[(i + 1) % 4]);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

/// Closest proper rotation to `m` in the Frobenius sense.
fn nearest_rotation(m: &na::Matrix3<f64>) -> Result<na::UnitQuaternion<f64>, PoseError> {
    let svd = m.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PoseError::Degenerate("SVD did not converge".to_string()));
    };

    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r = na::Rotation3::from_matrix_unchecked(u * v_t);
    Ok(na::UnitQuaternion::from_rotation_matrix(&r))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    pub(crate) fn intrinsics() -> CameraIntrinsics<f64> {
        CameraIntrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 320.0,
            cy: 240.0,
        }
    }

    /// A marker facing the camera, tilted a little.
    pub(crate) fn tilted_pose() -> (na::UnitQuaternion<f64>, na::Vector3<f64>) {
        let facing = na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), PI);
        let tilt = na::UnitQuaternion::from_euler_angles(0.3, -0.2, 0.4);
        (tilt * facing, na::Vector3::new(0.02, -0.01, 0.4))
    }

    pub(crate) fn project_corners(
        k: &CameraIntrinsics<f64>,
        size: f64,
        rotation: &na::UnitQuaternion<f64>,
        translation: &na::Vector3<f64>,
    ) -> anyhow::Result<MarkerCorners> {
        let mut corners = [na::Point2::origin(); 4];
        for (c, p) in corners.iter_mut().zip(model_points(size)) {
            let px = k.project(&na::Point3::from(rotation * p.coords + translation))?;
            *c = na::Point2::new(px.x as f32, px.y as f32);
        }
        Ok(corners)
    }

    #[test]
    fn test_recovers_exact_pose() -> anyhow::Result<()> {
        let k = intrinsics();
        let (rotation, translation) = tilted_pose();
        let corners = project_corners(&k, 0.05, &rotation, &translation)?;

        let solver = PoseSolver::new(k, 0.05)?;
        let pose = solver.solve(&Marker {
            id: 7,
            corners,
            hamming: 0,
        })?;

        assert_eq!(pose.id, 7);
        assert_relative_eq!(pose.translation, translation, epsilon = 1e-4);
        assert!(pose.rotation.angle_to(&rotation) < 1e-3);
        assert!(pose.reprojection_error < 1e-2);
        Ok(())
    }

    #[test]
    fn test_fronto_parallel_marker() -> anyhow::Result<()> {
        let k = intrinsics();
        let facing = na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), PI);
        let translation = na::Vector3::new(0.0, 0.0, 0.5);
        let corners = project_corners(&k, 0.1, &facing, &translation)?;

        // 0.1 m at 0.5 m with f = 800 spans 160 px, top-left first
        assert_relative_eq!(corners[0].x, 240.0, epsilon = 1e-3);
        assert_relative_eq!(corners[0].y, 160.0, epsilon = 1e-3);

        let (rotation, t, _) = PoseSolver::new(k, 0.1)?.solve_corners(&corners)?;
        assert_relative_eq!(t, translation, epsilon = 1e-5);
        assert!(rotation.angle_to(&facing) < 1e-4);
        Ok(())
    }

    #[test]
    fn test_rvec_and_isometry() -> anyhow::Result<()> {
        let (rotation, translation) = tilted_pose();
        let pose = MarkerPose {
            id: 1,
            rotation,
            translation,
            reprojection_error: 0.0,
        };

        assert_relative_eq!(pose.rvec().norm(), rotation.angle(), epsilon = 1e-12);
        let origin = pose.isometry() * na::Point3::origin();
        assert_relative_eq!(origin.coords, translation);
        Ok(())
    }

    #[test]
    fn test_invalid_marker_size() {
        for size in [0.0, -0.05, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                PoseSolver::new(intrinsics(), size),
                Err(PoseError::InvalidMarkerSize(_))
            ));
        }
    }

    #[test]
    fn test_degenerate_corners() -> anyhow::Result<()> {
        let solver = PoseSolver::new(intrinsics(), 0.05)?;
        let collinear = [0.0f32, 10.0, 20.0, 30.0].map(|x| na::Point2::new(x, x));
        assert!(matches!(
            solver.solve_corners(&collinear),
            Err(PoseError::Degenerate(_))
        ));
        Ok(())
    }
}
