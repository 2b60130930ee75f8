use nalgebra as na;

/// Douglas-Peucker simplification of a closed contour.
///
/// The contour is split at the point farthest from its first point and at the
/// point farthest from that one; both chains are then simplified independently.
pub fn approx_poly(contour: &[na::Point2<i32>], epsilon: f64) -> Vec<na::Point2<i32>> {
    let n = contour.len();
    if n < 3 {
        return contour.to_vec();
    }

    let a = farthest_from(contour, &contour[0]);
    let b = farthest_from(contour, &contour[a]);
    if distance(&contour[a], &contour[b]) <= epsilon {
        return vec![contour[a]];
    }

    let (first, last) = (a.min(b), a.max(b));
    let mut keep = vec![false; n];
    keep[first] = true;
    keep[last] = true;

    simplify_chain(contour, first, last, epsilon, &mut keep);
    simplify_chain(contour, last, first + n, epsilon, &mut keep);

    contour
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Marks the vertices kept between indices `first` and `last` (which may wrap).
fn simplify_chain(
    contour: &[na::Point2<i32>],
    first: usize,
    last: usize,
    epsilon: f64,
    keep: &mut [bool],
) {
    let n = contour.len();
    let mut stack = vec![(first, last)];

    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }

        let p0 = to_f64(&contour[start % n]);
        let p1 = to_f64(&contour[end % n]);
        let dir = p1 - p0;
        let len = dir.norm();

        let (split, max_dist) = (start + 1..end)
            .map(|i| {
                let p = to_f64(&contour[i % n]) - p0;
                let d = if len > 0.0 {
                    (dir.x * p.y - dir.y * p.x).abs() / len
                } else {
                    p.norm()
                };
                (i, d)
            })
            .fold((start, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if max_dist > epsilon {
            keep[split % n] = true;
            stack.push((start, split));
            stack.push((split, end));
        }
    }
}

fn farthest_from(contour: &[na::Point2<i32>], origin: &na::Point2<i32>) -> usize {
    contour
        .iter()
        .enumerate()
        .fold((0, -1.0), |best, (i, p)| {
            let d = distance(p, origin);
            if d > best.1 {
                (i, d)
            } else {
                best
            }
        })
        .0
}

fn to_f64(p: &na::Point2<i32>) -> na::Point2<f64> {
    na::Point2::new(p.x as f64, p.y as f64)
}

fn distance(a: &na::Point2<i32>, b: &na::Point2<i32>) -> f64 {
    na::distance(&to_f64(a), &to_f64(b))
}

/// Closed polygon perimeter.
pub fn perimeter(poly: &[na::Point2<f32>]) -> f32 {
    poly.iter()
        .zip(poly.iter().cycle().skip(1))
        .map(|(a, b)| na::distance(a, b))
        .sum()
}

/// Shortest edge of a closed polygon.
pub fn min_edge_length(poly: &[na::Point2<f32>]) -> f32 {
    if poly.len() < 2 {
        return 0.0;
    }
    poly.iter()
        .zip(poly.iter().cycle().skip(1))
        .map(|(a, b)| na::distance(a, b))
        .fold(f32::INFINITY, f32::min)
}

/// True if every turn of the closed polygon bends the same way.
pub fn is_convex(poly: &[na::Point2<f32>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut sign = 0.0f32;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let c = poly[(i + 2) % n];
        let cross = (b - a).perp(&(c - b));
        if cross == 0.0 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    sign != 0.0
}

/// Reorders a quadrilateral so it winds clockwise on screen (y down).
pub fn make_clockwise(quad: &mut [na::Point2<f32>; 4]) {
    let d1 = quad[1] - quad[0];
    let d2 = quad[2] - quad[0];
    if d1.perp(&d2) < 0.0 {
        quad.swap(1, 3);
    }
}
