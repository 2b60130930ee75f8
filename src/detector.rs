use image::GrayImage;
use itertools::Itertools;
use nalgebra as na;
use serde::Deserialize;
use tracing::debug;

use crate::cv::geometry::{
    approx_poly, is_convex, make_clockwise, min_edge_length, perimeter,
};
use crate::cv::subpix::{refine_corners, SubPixParams};
use crate::cv::threshold::{adaptive_threshold, otsu, threshold};
use crate::cv::{find_contours, warp_quad, Contour};
use crate::dictionary::{Bits, Dictionary, MARKER_CELLS, PAYLOAD};

/// Image corners of a marker: top-left, top-right, bottom-right, bottom-left
/// of the printed marker.
pub type MarkerCorners = [na::Point2<f32>; 4];

/// A decoded marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: i32,
    pub corners: MarkerCorners,
    /// Bits corrected while decoding
    pub hamming: u32,
}

impl Marker {
    pub fn center(&self) -> na::Point2<f32> {
        let sum = self
            .corners
            .iter()
            .fold(na::Vector2::zeros(), |acc, c| acc + c.coords);
        na::Point2::from(sum / 4.0)
    }
}

/// Tuning of the detection pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorParameters {
    /// Half size of the adaptive threshold window
    pub adaptive_radius: u32,
    /// How much darker than its neighbourhood a pixel must be
    pub adaptive_constant: u8,
    /// Minimum contour length as a fraction of the image width
    pub min_perimeter_ratio: f32,
    /// Polygon approximation tolerance as a fraction of contour length
    pub poly_epsilon_ratio: f32,
    /// Minimum candidate edge in pixels
    pub min_edge_length: f32,
    /// Candidates whose corners are on average closer than this fraction of the
    /// image width (never below 30 px) are duplicates
    pub min_corner_distance_ratio: f32,
    /// Pixels per cell in the rectified patch
    pub cell_px: u32,
    pub max_hamming: u32,
    pub refine_corners: bool,
    pub refine_window: u32,
    pub refine_iterations: usize,
    pub refine_epsilon: f64,
}

impl Default for DetectorParameters {
    fn default() -> Self {
        Self {
            adaptive_radius: 3,
            adaptive_constant: 7,
            min_perimeter_ratio: 0.01,
            poly_epsilon_ratio: 0.05,
            min_edge_length: 10.0,
            min_corner_distance_ratio: 0.05,
            cell_px: 7,
            max_hamming: 0,
            refine_corners: true,
            refine_window: 5,
            refine_iterations: 30,
            refine_epsilon: 0.01,
        }
    }
}

/// ArUco marker detector.
#[derive(Debug, Clone, Default)]
pub struct Detector {
    pub params: DetectorParameters,
    pub dictionary: Dictionary,
}

impl Detector {
    pub fn new(params: DetectorParameters) -> Self {
        let dictionary = Dictionary::new(params.max_hamming);
        Self { params, dictionary }
    }

    /// Threshold, trace contours, keep convex quadrilaterals, then decode each.
    pub fn detect(&self, grey: &GrayImage) -> Vec<Marker> {
        let width = grey.width();
        if width == 0 || grey.height() == 0 {
            return Vec::new();
        }

        let binary = adaptive_threshold(
            grey,
            self.params.adaptive_radius,
            self.params.adaptive_constant,
        );
        let contours = find_contours(&binary);

        let mut candidates = self.find_candidates(&contours, width);
        candidates.iter_mut().for_each(make_clockwise);

        let min_dist = f32::max(30.0, width as f32 * self.params.min_corner_distance_ratio);
        let candidates = not_too_near(candidates, min_dist);

        let mut markers = self.find_markers(grey, &candidates);

        if self.params.refine_corners {
            for marker in markers.iter_mut() {
                // Stay inside the border cell so the payload edges don't pull the corner
                let cell = min_edge_length(&marker.corners) / MARKER_CELLS as f32;
                let params = SubPixParams {
                    window: self.params.refine_window.min((cell / 2.0) as u32),
                    max_iterations: self.params.refine_iterations,
                    epsilon: self.params.refine_epsilon,
                };
                refine_corners(grey, &mut marker.corners, &params);
            }
        }

        debug!(
            contours = contours.len(),
            candidates = candidates.len(),
            markers = markers.len(),
            "marker detection"
        );

        markers
    }

    /// Convex quadrilaterals among the contours.
    fn find_candidates(&self, contours: &[Contour], image_width: u32) -> Vec<MarkerCorners> {
        let min_size = (image_width as f32 * self.params.min_perimeter_ratio) as usize;

        contours
            .iter()
            .filter(|c| c.points.len() >= min_size)
            .filter_map(|c| {
                let epsilon = c.points.len() as f64 * self.params.poly_epsilon_ratio as f64;
                let poly = approx_poly(&c.points, epsilon);
                if poly.len() != 4 {
                    return None;
                }
                let quad: MarkerCorners =
                    [0usize, 1, 2, 3].map(|i| na::Point2::new(poly[i].x as f32, poly[i].y as f32));
                (is_convex(&quad) && min_edge_length(&quad) >= self.params.min_edge_length)
                    .then_some(quad)
            })
            .collect()
    }

    fn find_markers(&self, grey: &GrayImage, candidates: &[MarkerCorners]) -> Vec<Marker> {
        let patch_size = MARKER_CELLS as u32 * self.params.cell_px;

        candidates
            .iter()
            .filter_map(|candidate| {
                let patch = warp_quad(grey, candidate, patch_size).ok()?;
                let level = otsu(patch.as_raw());
                let binary = threshold(patch.as_raw(), level);
                let bits = self.read_bits(&binary, patch_size as usize)?;
                let found = self.dictionary.identify(&bits)?;

                // The payload matched after `rotation` clockwise turns, so the
                // marker's top-left corner is that many places back.
                let r = found.rotation;
                let corners = [0, 1, 2, 3].map(|i| candidate[(i + 4 - r) % 4]);

                Some(Marker {
                    id: found.id as i32,
                    corners,
                    hamming: found.distance,
                })
            })
            .collect()
    }

    /// Samples the cell grid of a thresholded patch. Fails when a border cell
    /// is not black.
    fn read_bits(&self, binary: &[u8], size: usize) -> Option<Bits> {
        let cell = size / MARKER_CELLS;
        let half = cell * cell / 2;

        let white = |row: usize, col: usize| {
            let count = (row * cell..(row + 1) * cell)
                .flat_map(|y| (col * cell..(col + 1) * cell).map(move |x| y * size + x))
                .filter(|&idx| binary[idx] != 0)
                .count();
            count > half
        };

        let last = MARKER_CELLS - 1;
        for i in 0..MARKER_CELLS {
            if white(0, i) || white(last, i) || white(i, 0) || white(i, last) {
                return None;
            }
        }

        let mut bits = [[0u8; PAYLOAD]; PAYLOAD];
        for (r, row) in bits.iter_mut().enumerate() {
            for (c, bit) in row.iter_mut().enumerate() {
                *bit = u8::from(white(r + 1, c + 1));
            }
        }
        Some(bits)
    }
}

/// Mean squared distance between the corners of two clockwise quads, taking
/// the best alignment of their starting corners.
fn mean_corner_distance_sq(a: &MarkerCorners, b: &MarkerCorners) -> f32 {
    (0..4)
        .map(|shift| {
            a.iter()
                .enumerate()
                .map(|(k, p)| na::distance_squared(p, &b[(k + shift) % 4]))
                .sum::<f32>()
                / 4.0
        })
        .fold(f32::INFINITY, f32::min)
}

/// Drops candidates lying on top of a larger one.
fn not_too_near(candidates: Vec<MarkerCorners>, min_dist: f32) -> Vec<MarkerCorners> {
    let mut too_near = vec![false; candidates.len()];

    for ((i, a), (j, b)) in candidates.iter().enumerate().tuple_combinations() {
        if mean_corner_distance_sq(a, b) < min_dist * min_dist {
            if perimeter(a) < perimeter(b) {
                too_near[i] = true;
            } else {
                too_near[j] = true;
            }
        }
    }

    candidates
        .into_iter()
        .zip(too_near)
        .filter_map(|(c, near)| (!near).then_some(c))
        .collect()
}
