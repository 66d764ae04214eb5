//! Grayscale image buffers and strided point subsampling.

/// An owned 8-bit single-channel image with an explicit row stride.
///
/// Rows may be padded (`stride >= width`). All pixel access goes through
/// bounds-checked row slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
}

impl GrayImage {
    /// Allocate a zeroed, tightly packed image.
    ///
    /// Uses a fallible reservation so an allocation failure surfaces as an
    /// error instead of aborting the process.
    pub fn try_new(width: u32, height: u32) -> Result<Self, FrameError> {
        Self::try_with_stride(width, height, width as usize)
    }

    /// Allocate a zeroed image whose rows are `stride` bytes apart.
    pub fn try_with_stride(width: u32, height: u32, stride: usize) -> Result<Self, FrameError> {
        if stride < width as usize {
            return Err(FrameError::InvalidStride {
                stride,
                width: width as usize,
            });
        }
        let len = stride
            .checked_mul(height as usize)
            .ok_or(FrameError::Allocation { bytes: usize::MAX })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| FrameError::Allocation { bytes: len })?;
        data.resize(len, 0);
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// Wrap an existing buffer. `data` must hold `stride * height` bytes.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32, stride: usize) -> Result<Self, FrameError> {
        if stride < width as usize {
            return Err(FrameError::InvalidStride {
                stride,
                width: width as usize,
            });
        }
        let expected = stride.checked_mul(height as usize).ok_or(FrameError::SourceTooShort {
            expected: usize::MAX,
            actual: data.len(),
        })?;
        if data.len() < expected {
            return Err(FrameError::SourceTooShort {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// Filled, tightly packed image. Mostly useful for synthetic inputs.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: vec![value; width as usize * height as usize],
            width,
            height,
            stride: width as usize,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw buffer including row padding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Row `y` without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        let width = self.width as usize;
        &mut self.data[start..start + width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        (0..self.height).map(move |y| self.row(y))
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[y as usize * self.stride + x as usize])
    }

    /// Copy pixels into a tightly packed vector (padding dropped).
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize);
        for row in self.rows() {
            out.extend_from_slice(row);
        }
        out
    }

    /// Sum of all pixel values inside the half-open rectangle.
    pub(crate) fn region_sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> u64 {
        let x1 = x1.min(self.width) as usize;
        let x0 = (x0 as usize).min(x1);
        (y0..y1.min(self.height))
            .map(|y| self.row(y)[x0..x1].iter().map(|&p| p as u64).sum::<u64>())
            .sum()
    }
}

/// Destination size for subsampling by `factor`, truncated.
pub fn subsampled_dims(width: u32, height: u32, factor: u32) -> Result<(u32, u32), FrameError> {
    if factor == 0 {
        return Err(FrameError::InvalidFactor);
    }
    Ok((width / factor, height / factor))
}

/// Point-sample `source` into `dest`: `dest[y][x] = source[y*f][x*f]`.
///
/// `source` is read as a tightly packed plane whose row stride is `width`.
/// Buffers whose platform row stride exceeds `width` are misread: each
/// sampled row drifts by the padding. `dest` must already have the
/// dimensions returned by [`subsampled_dims`]; its own stride is honoured.
pub fn subsample(
    source: &[u8],
    width: u32,
    height: u32,
    factor: u32,
    dest: &mut GrayImage,
) -> Result<(), FrameError> {
    let (dst_w, dst_h) = subsampled_dims(width, height, factor)?;
    if dest.dims() != (dst_w, dst_h) {
        return Err(FrameError::DimensionMismatch {
            expected: (dst_w, dst_h),
            actual: dest.dims(),
        });
    }
    let expected = width as usize * height as usize;
    if source.len() < expected {
        return Err(FrameError::SourceTooShort {
            expected,
            actual: source.len(),
        });
    }

    let f = factor as usize;
    let data_stride = f * width as usize;
    for y in 0..dst_h {
        let line = &source[y as usize * data_stride..];
        for (x, out) in dest.row_mut(y).iter_mut().enumerate() {
            *out = line[f * x];
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("subsampling factor must be at least 1")]
    InvalidFactor,
    #[error("row stride {stride} is narrower than width {width}")]
    InvalidStride { stride: usize, width: usize },
    #[error("source buffer too short: expected {expected}, got {actual}")]
    SourceTooShort { expected: usize, actual: usize },
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("failed to allocate {bytes} bytes for frame buffer")]
    Allocation { bytes: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: u32, height: u32) -> Vec<u8> {
        (0..width * height).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_subsampled_dims_truncate() {
        assert_eq!(subsampled_dims(640, 480, 8).unwrap(), (80, 60));
        assert_eq!(subsampled_dims(642, 487, 8).unwrap(), (80, 60));
        assert_eq!(subsampled_dims(7, 7, 8).unwrap(), (0, 0));
    }

    #[test]
    fn test_zero_factor_rejected() {
        assert!(matches!(subsampled_dims(4, 4, 0), Err(FrameError::InvalidFactor)));
        let mut dest = GrayImage::filled(0, 0, 0);
        assert!(matches!(
            subsample(&[0; 16], 4, 4, 0, &mut dest),
            Err(FrameError::InvalidFactor)
        ));
    }

    #[test]
    fn test_subsample_point_samples() {
        // 4x4 source, factor 2 → picks (0,0) (2,0) (0,2) (2,2)
        let source: Vec<u8> = (0..16).collect();
        let mut dest = GrayImage::try_new(2, 2).unwrap();
        subsample(&source, 4, 4, 2, &mut dest).unwrap();
        assert_eq!(dest.to_packed(), vec![0, 2, 8, 10]);
    }

    #[test]
    fn test_subsample_identity_factor_is_noop() {
        for &(w, h) in &[(4u32, 4u32), (6, 3), (16, 9)] {
            let source = ramp(w, h);
            let mut once = GrayImage::try_new(w, h).unwrap();
            subsample(&source, w, h, 1, &mut once).unwrap();
            assert_eq!(once.to_packed(), source);

            let mut twice = GrayImage::try_new(w, h).unwrap();
            subsample(once.as_bytes(), w, h, 1, &mut twice).unwrap();
            assert_eq!(twice, once);
        }
    }

    #[test]
    fn test_subsample_output_dims_always_truncated() {
        for &(w, h, f) in &[(17u32, 9u32, 4u32), (640, 480, 8), (10, 10, 3)] {
            let source = ramp(w, h);
            let (dw, dh) = subsampled_dims(w, h, f).unwrap();
            assert_eq!((dw, dh), (w / f, h / f));
            let mut dest = GrayImage::try_new(dw, dh).unwrap();
            subsample(&source, w, h, f, &mut dest).unwrap();
            for y in 0..dh {
                for x in 0..dw {
                    let expected = source[(y * f * w + x * f) as usize];
                    assert_eq!(dest.get(x, y), Some(expected));
                }
            }
        }
    }

    #[test]
    fn test_subsample_rejects_wrong_destination() {
        let source = ramp(8, 8);
        let mut dest = GrayImage::try_new(3, 4).unwrap();
        let err = subsample(&source, 8, 8, 2, &mut dest).unwrap_err();
        assert!(matches!(
            err,
            FrameError::DimensionMismatch {
                expected: (4, 4),
                actual: (3, 4)
            }
        ));
    }

    #[test]
    fn test_subsample_rejects_short_source() {
        let mut dest = GrayImage::try_new(2, 2).unwrap();
        let err = subsample(&[0u8; 10], 4, 4, 2, &mut dest).unwrap_err();
        assert!(matches!(err, FrameError::SourceTooShort { expected: 16, actual: 10 }));
    }

    #[test]
    fn test_subsample_honours_destination_stride() {
        let source: Vec<u8> = (0..16).collect();
        let mut dest = GrayImage::try_with_stride(2, 2, 5).unwrap();
        subsample(&source, 4, 4, 2, &mut dest).unwrap();
        assert_eq!(dest.row(0), &[0, 2]);
        assert_eq!(dest.row(1), &[8, 10]);
        // Padding bytes untouched
        assert_eq!(&dest.as_bytes()[2..5], &[0, 0, 0]);
    }

    #[test]
    fn test_padded_source_rows_are_misread() {
        // A 4x4 image stored with a 6-byte row stride (2 bytes padding).
        // The subsampler assumes stride == width, so row 2 of the image is
        // read from offset 2*4 = 8, which is still inside padded row 1.
        let stride = 6usize;
        let mut padded = vec![0xEEu8; stride * 4];
        for y in 0..4usize {
            for x in 0..4usize {
                padded[y * stride + x] = (y * 10 + x) as u8;
            }
        }
        let mut dest = GrayImage::try_new(2, 2).unwrap();
        subsample(&padded, 4, 4, 2, &mut dest).unwrap();

        assert_eq!(dest.row(0), &[0, 2]);
        // Tightly packed input would give [20, 22]; padding skews it.
        assert_eq!(dest.row(1), &[12, 0xEE]);
        assert_ne!(dest.row(1), &[20, 22]);
    }

    #[test]
    fn test_from_raw_size_overflow_rejected() {
        let err = GrayImage::from_raw(vec![0u8; 4], 2, u32::MAX, usize::MAX).unwrap_err();
        assert!(matches!(err, FrameError::SourceTooShort { expected: usize::MAX, actual: 4 }));
    }

    #[test]
    fn test_invalid_stride_rejected() {
        assert!(matches!(
            GrayImage::try_with_stride(8, 2, 4),
            Err(FrameError::InvalidStride { stride: 4, width: 8 })
        ));
    }

    #[test]
    fn test_region_sum_clamps_to_bounds() {
        let img = GrayImage::filled(4, 4, 2);
        assert_eq!(img.region_sum(0, 0, 4, 4), 32);
        assert_eq!(img.region_sum(1, 1, 3, 3), 8);
        assert_eq!(img.region_sum(2, 2, 10, 10), 8);
    }
}
