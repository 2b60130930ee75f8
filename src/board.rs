//! Fixed board markers and the pieces placed on them.

use nalgebra as na;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::estimate::MarkerTransform;

/// Which markers are fixed to the board, where they sit, and how large
/// board and piece markers are printed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "LayoutConfig")]
pub struct BoardLayout {
    /// Side of a board marker in metres
    pub board_marker_size: f64,
    /// Side of a piece marker in metres
    pub piece_marker_size: f64,
    /// Board marker ids and their origins in board coordinates
    pub fixed: BTreeMap<i32, na::Point3<f64>>,
}

impl Default for BoardLayout {
    fn default() -> Self {
        LayoutConfig::default().into()
    }
}

impl BoardLayout {
    pub fn is_board_marker(&self, id: i32) -> bool {
        self.fixed.contains_key(&id)
    }

    pub fn marker_size(&self, id: i32) -> f64 {
        if self.is_board_marker(id) {
            self.board_marker_size
        } else {
            self.piece_marker_size
        }
    }

    /// Component-wise extent of the board marker positions.
    pub fn bounds(&self) -> Option<(na::Point3<f64>, na::Point3<f64>)> {
        let mut positions = self.fixed.values();
        let first = *positions.next()?;

        Some(positions.fold((first, first), |(lo, hi), p| {
            (lo.inf(p), hi.sup(p))
        }))
    }

    /// Splits transforms into board markers and pieces, keeping their order.
    pub fn partition(
        &self,
        transforms: &[MarkerTransform],
    ) -> (Vec<MarkerTransform>, Vec<MarkerTransform>) {
        transforms
            .iter()
            .cloned()
            .partition(|t| self.is_board_marker(t.aruco_id))
    }

    /// Position of marker `id` in board coordinates.
    ///
    /// Board markers sit at their fixed position. A piece is placed relative to
    /// every visible board marker and the results averaged; without a visible
    /// board marker it cannot be placed.
    pub fn locate(
        &self,
        id: i32,
        board: &[MarkerTransform],
        pieces: &[MarkerTransform],
    ) -> Option<na::Point3<f64>> {
        if let Some(fixed) = self.fixed.get(&id) {
            return Some(*fixed);
        }

        let piece = pieces.iter().find(|p| p.aruco_id == id)?;

        let estimates: Vec<na::Vector3<f64>> = board
            .iter()
            .filter_map(|b| {
                let origin = self.fixed.get(&b.aruco_id)?;
                let relative = b.transform.inverse() * piece.transform;
                Some(relative.translation.vector + origin.coords)
            })
            .collect();

        if estimates.is_empty() {
            return None;
        }
        let sum: na::Vector3<f64> = estimates.iter().sum();
        Some(na::Point3::from(sum / estimates.len() as f64))
    }
}

/// Serialized form of [`BoardLayout`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LayoutConfig {
    board_marker_size: f64,
    piece_marker_size: f64,
    fixed: Vec<FixedMarker>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixedMarker {
    id: i32,
    position: [f64; 3],
}

impl Default for LayoutConfig {
    fn default() -> Self {
        let fixed = [
            (666, [0.0, 0.0, 0.0]),
            (669, [0.15, 0.0, 0.0]),
            (66, [0.0, 0.15, 0.0]),
            (69, [0.15, 0.15, 0.0]),
        ]
        .into_iter()
        .map(|(id, position)| FixedMarker { id, position })
        .collect();

        Self {
            board_marker_size: 0.050,
            piece_marker_size: 0.025,
            fixed,
        }
    }
}

impl From<LayoutConfig> for BoardLayout {
    fn from(config: LayoutConfig) -> Self {
        Self {
            board_marker_size: config.board_marker_size,
            piece_marker_size: config.piece_marker_size,
            fixed: config
                .fixed
                .into_iter()
                .map(|m| (m.id, na::Point3::from(m.position)))
                .collect(),
        }
    }
}
