//! World-anchored grid drawn over the board plane.

use itertools::iproduct;
use nalgebra as na;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::board::BoardLayout;
use crate::estimate::MarkerTransform;

/// Integer grid coordinates `(i, j)`: the point sits at `(i, j) * stride` in
/// board coordinates.
pub type GridCell = (i32, i32);

/// Upper bound on the number of grid points.
pub const MAX_GRID_CELLS: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Grid spacing in metres
    pub stride: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self { stride: 0.05 }
    }
}

/// Changes to the grid produced by one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayUpdate {
    pub added: Vec<(GridCell, na::Isometry3<f64>)>,
    pub moved: Vec<(GridCell, na::Isometry3<f64>)>,
    pub removed: Vec<GridCell>,
}

impl OverlayUpdate {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.moved.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GridOverlay {
    pub config: OverlayConfig,
    points: BTreeMap<GridCell, na::Isometry3<f64>>,
}

impl GridOverlay {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            points: BTreeMap::new(),
        }
    }

    /// Current world pose of every grid point.
    pub fn points(&self) -> &BTreeMap<GridCell, na::Isometry3<f64>> {
        &self.points
    }

    /// Grid cells covering the board markers' extent.
    pub fn cells(&self, layout: &BoardLayout) -> Vec<GridCell> {
        let Some((lo, hi)) = layout.bounds() else {
            return Vec::new();
        };
        let stride = self.config.stride;
        if !(stride.is_finite() && stride > 0.0) {
            return Vec::new();
        }

        // Positions on a grid line must not spill into the next cell
        let first = |v: f64| (v / stride + 1e-9).floor() as i32;
        let last = |v: f64| (v / stride - 1e-9).ceil() as i32;

        let (x0, x1) = (first(lo.x), last(hi.x));
        let (y0, y1) = (first(lo.y), last(hi.y));
        let count = (i64::from(x1) - i64::from(x0) + 1)
            .saturating_mul(i64::from(y1) - i64::from(y0) + 1);
        if count > MAX_GRID_CELLS {
            warn!(stride, count, "grid stride too fine, grid disabled");
            return Vec::new();
        }

        iproduct!(x0..=x1, y0..=y1).collect()
    }

    /// Re-anchors the grid to the visible board markers, given as world
    /// transforms. Without board markers the grid stays where it was.
    pub fn update(&mut self, layout: &BoardLayout, board: &[MarkerTransform]) -> OverlayUpdate {
        let anchors: Vec<(na::Isometry3<f64>, na::Point3<f64>)> = board
            .iter()
            .filter_map(|b| Some((b.transform, *layout.fixed.get(&b.aruco_id)?)))
            .collect();

        let mut update = OverlayUpdate::default();
        let Some(rotation) = mean_rotation(anchors.iter().map(|(world, _)| world.rotation)) else {
            return update;
        };

        let cells = self.cells(layout);
        let stride = self.config.stride;

        for &(i, j) in &cells {
            let local = na::Point3::new(i as f64 * stride, j as f64 * stride, 0.0);
            let sum: na::Vector3<f64> = anchors
                .iter()
                .map(|(world, origin)| (world * na::Point3::from(local - origin)).coords)
                .sum();
            let position = sum / anchors.len() as f64;
            let pose = na::Isometry3::from_parts(na::Translation3::from(position), rotation);

            match self.points.insert((i, j), pose) {
                Some(_) => update.moved.push(((i, j), pose)),
                None => update.added.push(((i, j), pose)),
            }
        }

        let stale: Vec<GridCell> = self
            .points
            .keys()
            .filter(|cell| !cells.contains(cell))
            .copied()
            .collect();
        for cell in stale {
            self.points.remove(&cell);
            update.removed.push(cell);
        }

        update
    }

    /// Removes every grid point.
    pub fn clear(&mut self) -> Vec<GridCell> {
        let removed = self.points.keys().copied().collect();
        self.points.clear();
        removed
    }
}

/// Normalized sum of quaternions, each flipped into the hemisphere of the first.
fn mean_rotation<I>(rotations: I) -> Option<na::UnitQuaternion<f64>>
where
    I: IntoIterator<Item = na::UnitQuaternion<f64>>,
{
    let mut rotations = rotations.into_iter();
    let first = rotations.next()?;

    let sum = rotations.fold(first.into_inner().coords, |acc, q| {
        let q = q.into_inner().coords;
        if q.dot(&first.coords) < 0.0 {
            acc - q
        } else {
            acc + q
        }
    });

    na::UnitQuaternion::try_new(na::Quaternion::from(sum), f64::EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn at(id: i32, transform: na::Isometry3<f64>) -> MarkerTransform {
        MarkerTransform {
            aruco_id: id,
            transform,
        }
    }

    #[test]
    fn test_default_cells() {
        let overlay = GridOverlay::default();
        let cells = overlay.cells(&BoardLayout::default());

        // 0.00 ..= 0.15 in steps of 0.05 on both axes
        assert_eq!(cells.len(), 16);
        assert_eq!(cells.first(), Some(&(0, 0)));
        assert_eq!(cells.last(), Some(&(3, 3)));
    }

    #[test]
    fn test_too_fine_stride_has_no_cells() {
        let overlay = GridOverlay::new(OverlayConfig { stride: 1e-7 });
        assert!(overlay.cells(&BoardLayout::default()).is_empty());

        // 0.15 / 0.0015 = 100 steps, 101 points per axis
        let overlay = GridOverlay::new(OverlayConfig { stride: 0.0015 });
        assert!(overlay.cells(&BoardLayout::default()).is_empty());

        let overlay = GridOverlay::new(OverlayConfig { stride: 0.0016 });
        assert!(!overlay.cells(&BoardLayout::default()).is_empty());
    }

    #[test]
    fn test_no_board_markers_is_noop() {
        let mut overlay = GridOverlay::default();
        let update = overlay.update(&BoardLayout::default(), &[at(7, na::Isometry3::identity())]);
        assert!(update.is_empty());
        assert!(overlay.points().is_empty());
    }

    #[test]
    fn test_grid_follows_board() {
        let layout = BoardLayout::default();
        let mut overlay = GridOverlay::default();

        let board_pose = na::Isometry3::new(
            na::Vector3::new(0.3, 0.0, -1.0),
            na::Vector3::new(-std::f64::consts::FRAC_PI_2, 0.0, 0.0),
        );
        let board = [
            at(666, board_pose),
            at(669, board_pose * na::Isometry3::translation(0.15, 0.0, 0.0)),
        ];

        let update = overlay.update(&layout, &board);
        assert_eq!(update.added.len(), 16);
        assert!(update.moved.is_empty());

        let expected = board_pose * na::Point3::new(0.05, 0.10, 0.0);
        let point = overlay.points()[&(1, 2)];
        assert_relative_eq!(point.translation.vector, expected.coords, epsilon = 1e-12);
        assert!(point.rotation.angle_to(&board_pose.rotation) < 1e-9);

        // Same markers again: every point moves, nothing is added
        let update = overlay.update(&layout, &board);
        assert!(update.added.is_empty());
        assert_eq!(update.moved.len(), 16);
    }

    #[test]
    fn test_shrinking_layout_removes_points() {
        let mut overlay = GridOverlay::default();
        let board = [at(666, na::Isometry3::identity())];
        overlay.update(&BoardLayout::default(), &board);

        let mut small = BoardLayout::default();
        small.fixed.retain(|id, _| *id == 666 || *id == 669);
        let update = overlay.update(&small, &board);

        // Only the row j = 0 remains
        assert_eq!(update.moved.len(), 4);
        assert_eq!(update.removed.len(), 12);
        assert_eq!(overlay.clear().len(), 4);
    }

    #[test]
    fn test_mean_rotation_handles_sign() -> anyhow::Result<()> {
        let q = na::UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let flipped = na::UnitQuaternion::new_unchecked(-q.into_inner());

        let mean = mean_rotation([q, flipped]).ok_or(anyhow::anyhow!("no mean"))?;
        assert!(mean.angle_to(&q) < 1e-12);
        Ok(())
    }
}
