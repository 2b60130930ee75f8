use nalgebra as na;
use num_traits::Float;
use std::fmt::Debug;
use tracing::{debug, warn};

use crate::camera::{vision_to_scene, CameraIntrinsics};
use crate::detector::{Detector, DetectorParameters, Marker};
use crate::error::Result;
use crate::frame::PixelBuffer;
use crate::pose::{PoseError, PoseSolver};

/// A decoded marker and its pose.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerTransform {
    pub aruco_id: i32,
    /// Marker-to-camera transform in the scene camera convention (y up,
    /// z towards the viewer). Left-multiply by the camera's world transform to
    /// place the marker in the world.
    pub transform: na::Isometry3<f64>,
}

/// Detects every marker in `pixel_buffer` and estimates its pose, assuming all
/// markers have side `marker_size` in metres.
///
/// Markers whose pose cannot be solved are skipped.
pub fn estimate_pose<F>(
    pixel_buffer: &PixelBuffer,
    intrinsics: &CameraIntrinsics<F>,
    marker_size: f64,
) -> Result<Vec<MarkerTransform>>
where
    F: Float + na::RealField + Debug,
{
    MarkerPoseEstimator::default().estimate(pixel_buffer, intrinsics, marker_size)
}

/// Reusable estimator holding a configured detector.
#[derive(Debug, Clone, Default)]
pub struct MarkerPoseEstimator {
    detector: Detector,
}

impl MarkerPoseEstimator {
    pub fn new(params: DetectorParameters) -> Self {
        Self {
            detector: Detector::new(params),
        }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn estimate<F>(
        &self,
        pixel_buffer: &PixelBuffer,
        intrinsics: &CameraIntrinsics<F>,
        marker_size: f64,
    ) -> Result<Vec<MarkerTransform>>
    where
        F: Float + na::RealField + Debug,
    {
        // Fail on a bad size even when the frame holds no markers
        PoseSolver::new(intrinsics.cast::<f64>()?, marker_size)?;
        self.estimate_with(pixel_buffer, intrinsics, |_| marker_size)
    }

    /// Like [`estimate`](Self::estimate) with the marker side chosen per id.
    pub fn estimate_with<F, S>(
        &self,
        pixel_buffer: &PixelBuffer,
        intrinsics: &CameraIntrinsics<F>,
        marker_size: S,
    ) -> Result<Vec<MarkerTransform>>
    where
        F: Float + na::RealField + Debug,
        S: Fn(i32) -> f64,
    {
        let intrinsics = intrinsics.cast::<f64>()?;
        let grey = pixel_buffer.luma()?;
        let markers = self.detector.detect(&grey);

        let to_scene = vision_to_scene::<f64>();
        let mut transforms = Vec::with_capacity(markers.len());

        for marker in &markers {
            match solve(&intrinsics, marker, marker_size(marker.id)) {
                Ok(pose) => transforms.push(MarkerTransform {
                    aruco_id: marker.id,
                    transform: to_scene * pose,
                }),
                Err(e) => warn!(id = marker.id, error = %e, "skipping marker without pose"),
            }
        }

        debug!(
            width = pixel_buffer.width,
            height = pixel_buffer.height,
            markers = markers.len(),
            poses = transforms.len(),
            "estimated marker poses"
        );

        Ok(transforms)
    }
}

fn solve(
    intrinsics: &CameraIntrinsics<f64>,
    marker: &Marker,
    marker_size: f64,
) -> std::result::Result<na::Isometry3<f64>, PoseError> {
    let solver = PoseSolver::new(*intrinsics, marker_size)?;
    Ok(solver.solve(marker)?.isometry())
}
