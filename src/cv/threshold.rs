use image::GrayImage;

/// Marks pixels darker than their neighbourhood as foreground (255).
///
/// The neighbourhood is a `(2 * radius + 1)` square box, clipped at the image
/// border, and a pixel is foreground when `pixel + constant <= mean`.
pub fn adaptive_threshold(src: &GrayImage, radius: u32, constant: u8) -> GrayImage {
    let width = src.width() as usize;
    let height = src.height() as usize;
    let raw = src.as_raw();

    // Summed-area table with a zero row and column in front
    let stride = width + 1;
    let mut integral = vec![0u64; stride * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0u64;
        for x in 0..width {
            row_sum += raw[y * width + x] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let r = radius as usize;
    let constant = constant as u64;
    let mut dst = vec![0u8; width * height];

    for y in 0..height {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(height);
        for x in 0..width {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(width);

            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((y1 - y0) * (x1 - x0)) as u64;

            if (raw[y * width + x] as u64 + constant) * count <= sum {
                dst[y * width + x] = 255;
            }
        }
    }

    GrayImage::from_raw(src.width(), src.height(), dst)
        .unwrap_or_else(|| GrayImage::new(src.width(), src.height()))
}

/// Otsu's threshold: the level maximising between-class variance.
pub fn otsu(src: &[u8]) -> u8 {
    let len = src.len() as f64;
    let mut hist = [0u32; 256];
    for &pixel in src {
        hist[pixel as usize] += 1;
    }

    let sum: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut threshold = 0u8;
    let mut sum_b = 0.0;
    let mut w_b = 0.0;
    let mut max = 0.0;

    for (i, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b == 0.0 {
            continue;
        }
        let w_f = len - w_b;
        if w_f == 0.0 {
            break;
        }

        sum_b += i as f64 * h as f64;
        let mu = sum_b / w_b - (sum - sum_b) / w_f;
        let between = w_b * w_f * mu * mu;

        if between > max {
            max = between;
            threshold = i as u8;
        }
    }

    threshold
}

/// Binary threshold: values above `level` become 255, the rest 0.
pub fn threshold(src: &[u8], level: u8) -> Vec<u8> {
    src.iter()
        .map(|&v| if v > level { 255 } else { 0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_otsu_threshold() {
        // Half 50s and half 141s: between-class variance peaks at the lower value
        let gray: Vec<u8> = (0..64).map(|i| if i % 2 == 0 { 141 } else { 50 }).collect();
        assert_eq!(otsu(&gray), 50);
    }

    #[test]
    fn test_threshold_bounds() {
        let gray: Vec<u8> = (0..64).map(|i| if i % 2 == 0 { 141 } else { 50 }).collect();
        let dst = threshold(&gray, 50);
        for (i, v) in dst.iter().enumerate() {
            assert_eq!(*v, if i % 2 == 0 { 255 } else { 0 });
        }
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_edges() {
        // Dark square on a white background
        let img = GrayImage::from_fn(20, 20, |x, y| {
            let inside = (5..15).contains(&x) && (5..15).contains(&y);
            Luma([if inside { 0 } else { 255 }])
        });
        let out = adaptive_threshold(&img, 2, 7);

        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
        // Dark pixel on the edge of the square is foreground
        assert_eq!(out.get_pixel(5, 10)[0], 255);
        // Deep inside the uniform square and in the background it is not
        assert_eq!(out.get_pixel(10, 10)[0], 0);
        assert_eq!(out.get_pixel(1, 1)[0], 0);
        // Bright pixels never are
        assert_eq!(out.get_pixel(4, 10)[0], 0);
    }
}
