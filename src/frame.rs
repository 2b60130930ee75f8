use image::GrayImage;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame has empty dimensions {width}x{height}")]
    Empty { width: u32, height: u32 },

    #[error("{format:?} expects {expected} plane(s), got {actual}")]
    PlaneCount {
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("Plane {plane}: bytes_per_row {bytes_per_row} is below a row of {row_len} bytes")]
    Stride {
        plane: usize,
        bytes_per_row: usize,
        row_len: usize,
    },

    #[error("Plane {plane}: expected at least {expected} bytes, got {actual}")]
    Truncated {
        plane: usize,
        expected: usize,
        actual: usize,
    },
}

/// Memory layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single 8-bit luminance plane.
    Gray8,
    /// Packed 4 bytes per pixel, blue first.
    Bgra8,
    /// Packed 4 bytes per pixel, red first.
    Rgba8,
    /// Full resolution luma plane followed by an interleaved CbCr plane at half
    /// resolution in both directions.
    YCbCr420BiPlanar,
}

impl PixelFormat {
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Gray8 | PixelFormat::Bgra8 | PixelFormat::Rgba8 => 1,
            PixelFormat::YCbCr420BiPlanar => 2,
        }
    }

    /// Width in bytes and number of rows of `plane` for a `width`x`height` frame.
    fn plane_extent(self, plane: usize, width: usize, height: usize) -> (usize, usize) {
        match (self, plane) {
            (PixelFormat::Gray8, _) => (width, height),
            (PixelFormat::Bgra8 | PixelFormat::Rgba8, _) => (width * 4, height),
            (PixelFormat::YCbCr420BiPlanar, 0) => (width, height),
            (PixelFormat::YCbCr420BiPlanar, _) => (width.div_ceil(2) * 2, height.div_ceil(2)),
        }
    }
}

/// One row-strided plane of a frame.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
}

/// Borrowed view of a camera frame, laid out the way capture pipelines hand
/// frames over: one or more planes with a row stride that may exceed the
/// visible width.
#[derive(Debug, Clone)]
pub struct PixelBuffer<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane<'a>>,
}

impl<'a> PixelBuffer<'a> {
    pub fn gray(data: &'a [u8], width: u32, height: u32, bytes_per_row: usize) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Gray8,
            planes: vec![Plane {
                data,
                bytes_per_row,
            }],
        }
    }

    pub fn packed(
        data: &'a [u8],
        width: u32,
        height: u32,
        bytes_per_row: usize,
        format: PixelFormat,
    ) -> Self {
        Self {
            width,
            height,
            format,
            planes: vec![Plane {
                data,
                bytes_per_row,
            }],
        }
    }

    pub fn bi_planar(width: u32, height: u32, luma: Plane<'a>, chroma: Plane<'a>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::YCbCr420BiPlanar,
            planes: vec![luma, chroma],
        }
    }

    /// Checks dimensions, plane count, strides and buffer lengths.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }

        let expected = self.format.plane_count();
        if self.planes.len() != expected {
            return Err(FrameError::PlaneCount {
                format: self.format,
                expected,
                actual: self.planes.len(),
            });
        }

        for (idx, plane) in self.planes.iter().enumerate() {
            let (row_len, rows) =
                self.format
                    .plane_extent(idx, self.width as usize, self.height as usize);
            if plane.bytes_per_row < row_len {
                return Err(FrameError::Stride {
                    plane: idx,
                    bytes_per_row: plane.bytes_per_row,
                    row_len,
                });
            }
            let needed = plane.bytes_per_row * (rows - 1) + row_len;
            if plane.data.len() < needed {
                return Err(FrameError::Truncated {
                    plane: idx,
                    expected: needed,
                    actual: plane.data.len(),
                });
            }
        }

        Ok(())
    }

    /// Extracts the 8-bit luminance image used for detection.
    pub fn luma(&self) -> Result<GrayImage, FrameError> {
        self.validate()?;

        let width = self.width as usize;
        let height = self.height as usize;
        let plane = &self.planes[0];
        let mut out = Vec::with_capacity(width * height);

        match self.format {
            PixelFormat::Gray8 | PixelFormat::YCbCr420BiPlanar => {
                for row in plane.data.chunks(plane.bytes_per_row).take(height) {
                    out.extend_from_slice(&row[..width]);
                }
            }
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => {
                let (r_idx, b_idx) = if self.format == PixelFormat::Bgra8 {
                    (2, 0)
                } else {
                    (0, 2)
                };
                for row in plane.data.chunks(plane.bytes_per_row).take(height) {
                    out.extend(row[..width * 4].chunks_exact(4).map(|px| {
                        let r = px[r_idx] as f32;
                        let g = px[1] as f32;
                        let b = px[b_idx] as f32;
                        (r * 0.299 + g * 0.587 + b * 0.114 + 0.5) as u8
                    }));
                }
            }
        }

        // Length is width * height by construction.
        GrayImage::from_raw(self.width, self.height, out).ok_or(FrameError::Truncated {
            plane: 0,
            expected: width * height,
            actual: 0,
        })
    }
}

/// Owned frame storage, for handing frames to another thread.
#[derive(Debug, Clone)]
pub struct OwnedPixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<(Vec<u8>, usize)>,
}

impl OwnedPixelBuffer {
    pub fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            format: PixelFormat::Gray8,
            planes: vec![(image.as_raw().clone(), image.width() as usize)],
        }
    }

    pub fn as_buffer(&self) -> PixelBuffer<'_> {
        PixelBuffer {
            width: self.width,
            height: self.height,
            format: self.format,
            planes: self
                .planes
                .iter()
                .map(|(data, bytes_per_row)| Plane {
                    data,
                    bytes_per_row: *bytes_per_row,
                })
                .collect(),
        }
    }
}

impl From<&PixelBuffer<'_>> for OwnedPixelBuffer {
    fn from(buffer: &PixelBuffer<'_>) -> Self {
        Self {
            width: buffer.width,
            height: buffer.height,
            format: buffer.format,
            planes: buffer
                .planes
                .iter()
                .map(|p| (p.data.to_vec(), p.bytes_per_row))
                .collect(),
        }
    }
}
