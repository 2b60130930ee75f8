use nalgebra as na;

use crate::camera::CameraIntrinsics;

type Residuals = na::SVector<f64, 8>;
type Jacobian = na::SMatrix<f64, 8, 6>;

/// Pixel reprojection error of the four marker corners.
pub(super) struct Reprojection<'a> {
    pub intrinsics: &'a CameraIntrinsics<f64>,
    pub model: &'a [na::Point3<f64>; 4],
    pub observed: &'a [na::Point2<f64>; 4],
}

impl Reprojection<'_> {
    /// `None` if a corner ends up behind the camera.
    pub fn residuals(
        &self,
        rotation: &na::UnitQuaternion<f64>,
        translation: &na::Vector3<f64>,
    ) -> Option<Residuals> {
        let mut r = Residuals::zeros();
        for (i, (x, obs)) in self.model.iter().zip(self.observed).enumerate() {
            let pc = na::Point3::from(rotation * x.coords + translation);
            let px = self.intrinsics.project(&pc).ok()?;
            r[2 * i] = px.x - obs.x;
            r[2 * i + 1] = px.y - obs.y;
        }
        Some(r)
    }

    /// Derivative of the residuals with respect to a left rotation increment
    /// `exp(w) * R` followed by a translation increment.
    fn jacobian(
        &self,
        rotation: &na::UnitQuaternion<f64>,
        translation: &na::Vector3<f64>,
    ) -> Jacobian {
        let k = self.intrinsics;
        let mut j = Jacobian::zeros();

        for (i, x) in self.model.iter().enumerate() {
            let rx = rotation * x.coords;
            let pc = rx + translation;
            let z_inv = 1.0 / pc.z;

            let d_proj = na::Matrix2x3::new(
                k.fx * z_inv,
                0.0,
                -k.fx * pc.x * z_inv * z_inv,
                0.0,
                k.fy * z_inv,
                -k.fy * pc.y * z_inv * z_inv,
            );

            let d_rot = d_proj * -rx.cross_matrix();
            j.fixed_view_mut::<2, 3>(2 * i, 0).copy_from(&d_rot);
            j.fixed_view_mut::<2, 3>(2 * i, 3).copy_from(&d_proj);
        }
        j
    }

    /// Levenberg-Marquardt on the corner reprojection error. Returns the refined
    /// pose and the RMS error per corner in pixels.
    pub fn refine(
        &self,
        mut rotation: na::UnitQuaternion<f64>,
        mut translation: na::Vector3<f64>,
        max_iterations: usize,
    ) -> (na::UnitQuaternion<f64>, na::Vector3<f64>, f64) {
        let Some(mut residuals) = self.residuals(&rotation, &translation) else {
            return (rotation, translation, f64::INFINITY);
        };
        let mut cost = residuals.norm_squared();
        let mut lambda = 1e-3;

        for _ in 0..max_iterations {
            if cost < 1e-18 {
                break;
            }

            let j = self.jacobian(&rotation, &translation);
            let jtj = j.transpose() * j;
            let gradient = j.transpose() * residuals;

            let damped = jtj + na::Matrix6::from_diagonal(&jtj.diagonal()) * lambda;
            let Some(step) = damped.cholesky().map(|c| c.solve(&-gradient)) else {
                lambda *= 10.0;
                continue;
            };

            let increment = step.fixed_rows::<3>(0).into_owned();
            let candidate_rotation = na::UnitQuaternion::from_scaled_axis(increment) * rotation;
            let candidate_translation = translation + step.fixed_rows::<3>(3);

            match self.residuals(&candidate_rotation, &candidate_translation) {
                Some(r) if r.norm_squared() < cost => {
                    rotation = candidate_rotation;
                    translation = candidate_translation;
                    residuals = r;
                    let previous = cost;
                    cost = r.norm_squared();
                    lambda = (lambda / 10.0).max(1e-9);

                    if previous - cost < 1e-12 * previous || step.norm() < 1e-12 {
                        break;
                    }
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > 1e9 {
                        break;
                    }
                }
            }
        }

        (rotation, translation, (cost / 4.0).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::model_points;
    use crate::pose::tests::{intrinsics, project_corners, tilted_pose};
    use approx::assert_relative_eq;

    #[test]
    fn test_converges_from_perturbed_start() -> anyhow::Result<()> {
        let k = intrinsics();
        let (rotation, translation) = tilted_pose();
        let model = model_points(0.05);
        let observed = project_corners(&k, 0.05, &rotation, &translation)?
            .map(|c| na::Point2::new(c.x as f64, c.y as f64));

        let problem = Reprojection {
            intrinsics: &k,
            model: &model,
            observed: &observed,
        };

        let start_rotation =
            na::UnitQuaternion::from_scaled_axis(na::Vector3::new(0.05, -0.04, 0.03)) * rotation;
        let start_translation = translation + na::Vector3::new(0.005, 0.004, -0.02);
        let (r, t, rms) = problem.refine(start_rotation, start_translation, 50);

        assert!(rms < 1e-2, "rms = {rms}");
        assert_relative_eq!(t, translation, epsilon = 1e-4);
        assert!(r.angle_to(&rotation) < 1e-3);
        Ok(())
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let k = intrinsics();
        let (rotation, translation) = tilted_pose();
        let model = model_points(0.05);
        let observed = [na::Point2::origin(); 4];
        let problem = Reprojection {
            intrinsics: &k,
            model: &model,
            observed: &observed,
        };

        let j = problem.jacobian(&rotation, &translation);
        let Some(base) = problem.residuals(&rotation, &translation) else {
            panic!("marker should be in front of the camera");
        };

        let h = 1e-7;
        for col in 0..6 {
            let mut delta = na::Vector6::zeros();
            delta[col] = h;
            let r = na::UnitQuaternion::from_scaled_axis(delta.fixed_rows::<3>(0).into_owned())
                * rotation;
            let t = translation + delta.fixed_rows::<3>(3);
            let Some(moved) = problem.residuals(&r, &t) else {
                panic!("marker should be in front of the camera");
            };

            let numeric = (moved - base) / h;
            assert_relative_eq!(
                numeric,
                j.column(col).into_owned(),
                epsilon = 1e-2,
                max_relative = 1e-4
            );
        }
    }
}
