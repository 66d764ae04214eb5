//! Captured frame type and raw pixel-format to luma conversion.

/// One captured preview frame: a tightly packed 8-bit luma plane.
///
/// `data` is borrowed from the capture buffer pool and returned once the
/// consumer callback finishes.
#[derive(Debug)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

/// Pixel formats the camera can be negotiated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, 2 bytes per pixel. Luma is every even byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// 16-bit little-endian grayscale.
    Y16,
    /// NV12 / NV21 semi-planar: full luma plane followed by interleaved chroma.
    Nv12,
}

impl PixelFormat {
    /// Raw bytes the driver delivers for one `width x height` frame.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Grey => pixels,
            PixelFormat::Yuyv | PixelFormat::Y16 => pixels * 2,
            PixelFormat::Nv12 => pixels + pixels / 2,
        }
    }
}

/// Extract the luma plane of a raw buffer into `dest` (`width * height` bytes).
pub fn extract_luma(
    format: PixelFormat,
    raw: &[u8],
    width: u32,
    height: u32,
    dest: &mut [u8],
) -> Result<(), FrameError> {
    let pixels = width as usize * height as usize;
    if dest.len() != pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: dest.len(),
        });
    }
    let expected = format.frame_len(width, height);
    if raw.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: raw.len(),
        });
    }

    match format {
        // Semi-planar formats already start with a packed luma plane.
        PixelFormat::Grey | PixelFormat::Nv12 => dest.copy_from_slice(&raw[..pixels]),
        PixelFormat::Yuyv => {
            for (d, s) in dest.iter_mut().zip(raw.iter().step_by(2)) {
                *d = *s;
            }
        }
        PixelFormat::Y16 => {
            for (d, pair) in dest.iter_mut().zip(raw.chunks_exact(2)) {
                *d = (u16::from_le_bytes([pair[0], pair[1]]) >> 8) as u8;
            }
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
