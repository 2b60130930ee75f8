//! Synthetic camera views of printed markers, for exercising the pipeline
//! without a camera.

use anyhow::anyhow;
use image::{GrayImage, Luma};
use nalgebra as na;

use crate::camera::CameraIntrinsics;
use crate::dictionary::{Dictionary, MARKER_CELLS, PAYLOAD};
use crate::error::Result;
use crate::pose::{model_points, PoseError};

/// Subsamples per pixel along each axis.
const SUPERSAMPLING: u32 = 4;

/// A marker placed in front of the camera.
#[derive(Debug, Clone)]
pub struct SceneMarker {
    pub id: u32,
    /// Side in metres
    pub size: f64,
    /// Marker-to-camera transform in the vision camera frame
    pub pose: na::Isometry3<f64>,
}

/// Renders one marker seen under `pose` on a white background.
pub fn render_marker_view(
    dictionary: &Dictionary,
    id: u32,
    marker_size: f64,
    pose: &na::Isometry3<f64>,
    intrinsics: &CameraIntrinsics<f64>,
    width: u32,
    height: u32,
) -> Result<GrayImage> {
    let marker = SceneMarker {
        id,
        size: marker_size,
        pose: *pose,
    };
    render_scene(dictionary, &[marker], intrinsics, width, height)
}

/// Renders several markers, later ones drawn over earlier ones.
pub fn render_scene(
    dictionary: &Dictionary,
    markers: &[SceneMarker],
    intrinsics: &CameraIntrinsics<f64>,
    width: u32,
    height: u32,
) -> Result<GrayImage> {
    let mut image = GrayImage::from_pixel(width, height, Luma([255]));
    for marker in markers {
        draw(&mut image, dictionary, marker, intrinsics)?;
    }
    Ok(image)
}

fn draw(
    image: &mut GrayImage,
    dictionary: &Dictionary,
    marker: &SceneMarker,
    intrinsics: &CameraIntrinsics<f64>,
) -> Result<()> {
    if !marker.size.is_finite() || marker.size <= 0.0 {
        return Err(PoseError::InvalidMarkerSize(marker.size).into());
    }
    let bits = dictionary.encode(marker.id)?;

    // Pixels covered by the marker
    let mut lo = na::Point2::new(f64::INFINITY, f64::INFINITY);
    let mut hi = na::Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
    for corner in model_points(marker.size) {
        let px = intrinsics.project(&(marker.pose * corner))?;
        lo = lo.inf(&px);
        hi = hi.sup(&px);
    }
    let x_range = pixel_range(lo.x, hi.x, image.width());
    let y_range = pixel_range(lo.y, hi.y, image.height());

    // Marker plane (z = 0) to pixels and back
    let rotation = marker.pose.rotation.to_rotation_matrix();
    let r = rotation.matrix();
    let t = marker.pose.translation.vector;
    let plane_to_camera =
        na::Matrix3::from_columns(&[r.column(0).into_owned(), r.column(1).into_owned(), t]);
    let pixel_to_plane = (intrinsics.matrix() * plane_to_camera)
        .try_inverse()
        .ok_or(anyhow!("Marker plane passes through the camera centre"))?;

    let half = marker.size / 2.0;
    let cells = MARKER_CELLS as f64;
    let n = SUPERSAMPLING;

    for y in y_range {
        for x in x_range.clone() {
            let background = image.get_pixel(x, y)[0] as f64;
            let mut sum = 0.0;

            for (sx, sy) in itertools::iproduct!(0..n, 0..n) {
                let u = x as f64 + (sx as f64 + 0.5) / n as f64 - 0.5;
                let v = y as f64 + (sy as f64 + 0.5) / n as f64 - 0.5;
                let p = pixel_to_plane * na::Vector3::new(u, v, 1.0);

                let value = if p.z.abs() < f64::EPSILON {
                    background
                } else {
                    let (mx, my) = (p.x / p.z, p.y / p.z);
                    let depth = (rotation * na::Vector3::new(mx, my, 0.0) + t).z;
                    if mx.abs() > half || my.abs() > half || depth <= 0.0 {
                        background
                    } else {
                        let last = MARKER_CELLS - 1;
                        let col = (((mx + half) / marker.size * cells) as usize).min(last);
                        let row = (((half - my) / marker.size * cells) as usize).min(last);
                        let white = (1..=PAYLOAD).contains(&row)
                            && (1..=PAYLOAD).contains(&col)
                            && bits[row - 1][col - 1] == 1;
                        if white {
                            255.0
                        } else {
                            0.0
                        }
                    }
                };
                sum += value;
            }

            image.put_pixel(x, y, Luma([(sum / (n * n) as f64).round() as u8]));
        }
    }

    Ok(())
}

/// Pixels whose footprint overlaps `[lo, hi]`, clamped to the image.
fn pixel_range(lo: f64, hi: f64, len: u32) -> std::ops::Range<u32> {
    let start = (lo - 1.0).floor().max(0.0) as u32;
    let end = ((hi + 2.0).ceil().max(0.0) as u32).min(len);
    start.min(end)..end
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn intrinsics() -> CameraIntrinsics<f64> {
        CameraIntrinsics {
            fx: 400.0,
            fy: 400.0,
            cx: 160.0,
            cy: 120.0,
        }
    }

    fn facing(z: f64) -> na::Isometry3<f64> {
        na::Isometry3::from_parts(
            na::Translation3::new(0.0, 0.0, z),
            na::UnitQuaternion::from_axis_angle(&na::Vector3::x_axis(), PI),
        )
    }

    #[test]
    fn test_fronto_parallel_view() -> anyhow::Result<()> {
        let dict = Dictionary::default();
        // 0.07 m at 0.4 m spans 70 px: 10 px per cell, from (125, 85) to (195, 155)
        let img = render_marker_view(&dict, 0, 0.07, &facing(0.4), &intrinsics(), 320, 240)?;

        // Background, border and the white first payload cell of id 0
        assert_eq!(img.get_pixel(10, 10)[0], 255);
        assert_eq!(img.get_pixel(130, 90)[0], 0);
        assert_eq!(img.get_pixel(140, 100)[0], 255);
        assert_eq!(img.get_pixel(150, 100)[0], 0);
        Ok(())
    }

    #[test]
    fn test_marker_behind_camera() {
        let dict = Dictionary::default();
        let result = render_marker_view(&dict, 0, 0.07, &facing(-0.4), &intrinsics(), 320, 240);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_inputs() {
        let dict = Dictionary::default();
        let k = intrinsics();
        assert!(render_marker_view(&dict, 0, 0.0, &facing(0.4), &k, 320, 240).is_err());
        assert!(render_marker_view(&dict, 5000, 0.07, &facing(0.4), &k, 320, 240).is_err());
    }

    #[test]
    fn test_off_screen_marker_leaves_image_white() -> anyhow::Result<()> {
        let dict = Dictionary::default();
        let pose = na::Isometry3::translation(5.0, 0.0, 0.4) * facing(0.0);
        let img = render_marker_view(&dict, 0, 0.07, &pose, &intrinsics(), 320, 240)?;
        assert!(img.pixels().all(|p| p[0] == 255));
        Ok(())
    }
}
