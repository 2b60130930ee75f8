//! The original ArUco marker dictionary.
//!
//! Markers are 7x7 cells: a black border one cell wide around a 5x5 payload,
//! white cells reading as 1. Every payload row is one of four 5-bit words; bits
//! 1 and 3 of a row carry two bits of the id, first row most significant, so the
//! dictionary holds 1024 ids.

use image::{GrayImage, Luma};
use thiserror::Error;

/// Payload side in cells.
pub const PAYLOAD: usize = 5;

/// Marker side in cells, border included.
pub const MARKER_CELLS: usize = PAYLOAD + 2;

const WORDS: [[u8; PAYLOAD]; 4] = [
    [1, 0, 0, 0, 0],
    [1, 0, 1, 1, 1],
    [0, 1, 0, 0, 1],
    [0, 1, 1, 1, 0],
];

pub type Bits = [[u8; PAYLOAD]; PAYLOAD];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("Marker id {0} is outside the dictionary (0..{max})", max = Dictionary::SIZE)]
    UnknownId(u32),

    #[error("Cell size must be positive")]
    EmptyCell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryMatch {
    pub id: u32,
    /// Clockwise quarter turns applied to the sampled payload to read the marker
    pub rotation: usize,
    /// Hamming distance to the closest codeword
    pub distance: u32,
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    /// Largest accepted Hamming distance
    pub max_hamming: u32,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self { max_hamming: 0 }
    }
}

impl Dictionary {
    pub const SIZE: u32 = 1024;

    pub fn new(max_hamming: u32) -> Self {
        Self { max_hamming }
    }

    pub fn encode(&self, id: u32) -> Result<Bits, DictionaryError> {
        if id >= Self::SIZE {
            return Err(DictionaryError::UnknownId(id));
        }

        let mut bits = [[0u8; PAYLOAD]; PAYLOAD];
        for (row, out) in bits.iter_mut().enumerate() {
            let shift = 2 * (PAYLOAD - 1 - row);
            let word = ((id >> shift) & 0b11) as usize;
            *out = WORDS[word];
        }
        Ok(bits)
    }

    /// Matches a sampled payload, trying all four orientations.
    pub fn identify(&self, bits: &Bits) -> Option<DictionaryMatch> {
        let mut best: Option<DictionaryMatch> = None;
        let mut current = *bits;

        for rotation in 0..4 {
            let (id, distance) = decode(&current);
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(DictionaryMatch {
                    id,
                    rotation,
                    distance,
                });
            }
            if distance == 0 {
                break;
            }
            current = rotate_cw(&current);
        }

        best.filter(|m| m.distance <= self.max_hamming)
    }

    /// Renders a marker, border included, with `cell_px` pixels per cell.
    pub fn draw_marker(&self, id: u32, cell_px: u32) -> Result<GrayImage, DictionaryError> {
        if cell_px == 0 {
            return Err(DictionaryError::EmptyCell);
        }
        let bits = self.encode(id)?;
        let side = MARKER_CELLS as u32 * cell_px;

        Ok(GrayImage::from_fn(side, side, |x, y| {
            let cx = (x / cell_px) as usize;
            let cy = (y / cell_px) as usize;
            let white = (1..=PAYLOAD).contains(&cx)
                && (1..=PAYLOAD).contains(&cy)
                && bits[cy - 1][cx - 1] == 1;
            Luma([if white { 255 } else { 0 }])
        }))
    }
}

/// Closest id and its distance for a payload in canonical orientation.
fn decode(bits: &Bits) -> (u32, u32) {
    let mut id = 0u32;
    let mut distance = 0u32;

    for row in bits {
        let (word, row_distance) = WORDS
            .iter()
            .enumerate()
            .map(|(w, word)| {
                let d = word.iter().zip(row).filter(|(a, b)| a != b).count() as u32;
                (w as u32, d)
            })
            .min_by_key(|&(_, d)| d)
            .unwrap_or((0, PAYLOAD as u32));
        id = (id << 2) | word;
        distance += row_distance;
    }

    (id, distance)
}

/// Rotates a payload a quarter turn clockwise.
pub fn rotate_cw(src: &Bits) -> Bits {
    let mut dst = [[0u8; PAYLOAD]; PAYLOAD];
    for (i, row) in src.iter().enumerate() {
        for (j, &bit) in row.iter().enumerate() {
            dst[j][PAYLOAD - 1 - i] = bit;
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_zero_pattern() -> anyhow::Result<()> {
        let dict = Dictionary::default();
        let bits = dict.encode(0)?;
        assert!(bits.iter().all(|row| *row == [1, 0, 0, 0, 0]));
        Ok(())
    }

    #[test]
    fn test_every_id_decodes_to_itself() -> anyhow::Result<()> {
        let dict = Dictionary::default();
        for id in 0..Dictionary::SIZE {
            let found = dict.identify(&dict.encode(id)?);
            assert_eq!(
                found,
                Some(DictionaryMatch {
                    id,
                    rotation: 0,
                    distance: 0
                })
            );
        }
        Ok(())
    }

    #[test]
    fn test_rotated_payload_reports_rotation() -> anyhow::Result<()> {
        let dict = Dictionary::default();
        let bits = dict.encode(666)?;

        // Seen rotated a quarter turn counter-clockwise, one clockwise turn restores it.
        let ccw = rotate_cw(&rotate_cw(&rotate_cw(&bits)));
        let found = dict.identify(&ccw).ok_or(anyhow::anyhow!("no match"))?;
        assert_eq!(found.id, 666);
        assert_eq!(found.rotation, 1);
        Ok(())
    }

    #[test]
    fn test_hamming_tolerance() -> anyhow::Result<()> {
        let mut bits = Dictionary::default().encode(69)?;
        bits[2][4] ^= 1;

        assert_eq!(Dictionary::new(0).identify(&bits), None);
        let found = Dictionary::new(1)
            .identify(&bits)
            .ok_or(anyhow::anyhow!("no match"))?;
        assert_eq!((found.id, found.distance), (69, 1));
        Ok(())
    }

    #[test]
    fn test_rotate_cw() {
        let mut src = [[0u8; PAYLOAD]; PAYLOAD];
        src[0][0] = 1;
        let dst = rotate_cw(&src);
        assert_eq!(dst[0][PAYLOAD - 1], 1);
        assert_eq!(rotate_cw(&rotate_cw(&rotate_cw(&dst))), src);
    }

    #[test]
    fn test_draw_marker() -> anyhow::Result<()> {
        let dict = Dictionary::default();
        let img = dict.draw_marker(0, 4)?;
        assert_eq!(img.dimensions(), (28, 28));
        // Border is black, payload cell (0, 0) of id 0 is white
        assert_eq!(img.get_pixel(1, 1)[0], 0);
        assert_eq!(img.get_pixel(5, 5)[0], 255);
        assert_eq!(img.get_pixel(9, 5)[0], 0);

        assert!(matches!(
            dict.draw_marker(1024, 4),
            Err(DictionaryError::UnknownId(1024))
        ));
        Ok(())
    }
}
