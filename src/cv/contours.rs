//! Suzuki-Abe border following on binary images.

use image::GrayImage;
use nalgebra as na;

/// 8-connected neighbour offsets (x, y), counter-clockwise starting east.
const NEIGHBORHOOD: [[i32; 2]; 8] = [
    [1, 0],
    [1, -1],
    [0, -1],
    [-1, -1],
    [-1, 0],
    [-1, 1],
    [0, 1],
    [1, 1],
];

/// A traced border.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub points: Vec<na::Point2<i32>>,
    /// True if this contour bounds a hole inside a foreground region.
    pub hole: bool,
}

/// Flat label image with a zero border one pixel wide, so neighbour lookups
/// never leave the buffer.
struct Labels {
    data: Vec<i32>,
    /// Linear offsets of the 8 neighbours, repeated once so `s + k` needs no wrap.
    deltas: [isize; 16],
}

impl Labels {
    fn from_binary(src: &GrayImage) -> Self {
        let width = src.width() as usize;
        let height = src.height() as usize;
        let padded = width + 2;
        let mut data = vec![0i32; padded * (height + 2)];

        for (y, row) in src.as_raw().chunks(width).enumerate() {
            let start = (y + 1) * padded + 1;
            for (dst, &v) in data[start..start + width].iter_mut().zip(row) {
                *dst = i32::from(v != 0);
            }
        }

        let mut deltas = [0isize; 16];
        for (i, [dx, dy]) in NEIGHBORHOOD.iter().enumerate() {
            let delta = *dx as isize + *dy as isize * padded as isize;
            deltas[i] = delta;
            deltas[i + 8] = delta;
        }

        Self { data, deltas }
    }

    fn at(&self, pos: usize, dir: usize) -> usize {
        (pos as isize + self.deltas[dir]) as usize
    }

    /// Traces one border starting at `pos` and labels it with `nbd`.
    fn follow(&mut self, pos: usize, nbd: i32, mut point: na::Point2<i32>, hole: bool) -> Contour {
        let mut contour = Contour {
            points: Vec::new(),
            hole,
        };

        let s_start: usize = if hole { 0 } else { 4 };
        let mut s = s_start;
        let mut pos1;

        // Clockwise search for the first non-zero neighbour
        loop {
            s = s.wrapping_sub(1) & 7;
            pos1 = self.at(pos, s);
            if self.data[pos1] != 0 || s == s_start {
                break;
            }
        }

        if self.data[pos1] == 0 {
            // Isolated pixel
            self.data[pos] = -nbd;
            contour.points.push(point);
            return contour;
        }

        let mut pos3 = pos;
        loop {
            let s_end = s;
            let mut pos4;

            // Counter-clockwise search around pos3, starting after the previous pixel
            loop {
                s = (s + 1) & 15;
                pos4 = self.at(pos3, s);
                if self.data[pos4] != 0 {
                    break;
                }
            }
            s &= 7;

            // The east neighbour was examined and is background: right border
            if s.wrapping_sub(1) < s_end {
                self.data[pos3] = -nbd;
            } else if self.data[pos3] == 1 {
                self.data[pos3] = nbd;
            }

            contour.points.push(point);
            point.x += NEIGHBORHOOD[s][0];
            point.y += NEIGHBORHOOD[s][1];

            if pos4 == pos && pos3 == pos1 {
                break;
            }

            pos3 = pos4;
            s = (s + 4) & 7;
        }

        contour
    }
}

/// Finds every outer border and hole border of the non-zero regions of `src`.
pub fn find_contours(src: &GrayImage) -> Vec<Contour> {
    let width = src.width() as usize;
    let height = src.height() as usize;
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let mut labels = Labels::from_binary(src);
    let mut contours = Vec::new();

    let mut pos = width + 3;
    let mut nbd = 1;

    for y in 0..height {
        for x in 0..width {
            let pix = labels.data[pos];

            if pix != 0 {
                let outer = pix == 1 && labels.data[pos - 1] == 0;
                let hole = !outer && pix >= 1 && labels.data[pos + 1] == 0;

                if outer || hole {
                    nbd += 1;
                    let start = na::Point2::new(x as i32, y as i32);
                    contours.push(labels.follow(pos, nbd, start, hole));
                }
            }

            pos += 1;
        }
        // Skip right padding of this row and left padding of the next
        pos += 2;
    }

    contours
}
