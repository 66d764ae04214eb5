//! V4L2 preview capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelFormat};
use crate::pool::BufferPool;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Luma buffers kept in the pool while streaming.
const POOL_BUFFERS: usize = 3;
/// Driver-side mmap buffers.
const MMAP_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Requested preview format. The driver may negotiate something else.
#[derive(Debug, Clone, Copy)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, request: CaptureRequest) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        // Preview cameras commonly offer NV12; fall back to whatever luma-bearing
        // format the driver picks.
        fmt.fourcc = FourCC::new(b"NV12");
        fmt.width = request.width;
        fmt.height = request.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = pixel_format_for(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need NV12, NV21, YUYV, GREY, or Y16)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Stream frames into `on_frame` until `stop` is set or the callback
    /// returns `false`.
    ///
    /// Each frame's luma plane lives in a buffer taken from an internal pool
    /// and is given back only after `on_frame` returns, so the consumer always
    /// finishes a frame before its storage is reused. Capture errors observed
    /// after `stop` was raised are logged and swallowed.
    pub fn stream<F>(&self, stop: &AtomicBool, mut on_frame: F) -> Result<u64, CameraError>
    where
        F: FnMut(Frame<'_>) -> bool,
    {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let luma_len = self.width as usize * self.height as usize;
        let mut pool = BufferPool::new(luma_len, POOL_BUFFERS);
        let mut delivered = 0u64;

        while !stop.load(Ordering::Relaxed) {
            let (raw, meta) = match stream.next() {
                Ok(next) => next,
                Err(e) if stop.load(Ordering::Relaxed) => {
                    tracing::debug!(error = %e, "capture error after stop, ignoring");
                    break;
                }
                Err(e) => {
                    return Err(CameraError::CaptureFailed(format!(
                        "failed to dequeue buffer: {e}"
                    )))
                }
            };

            let mut luma = pool.take();
            if let Err(e) = frame::extract_luma(self.pixel_format, raw, self.width, self.height, &mut luma) {
                pool.give_back(luma);
                tracing::warn!(seq = meta.sequence, error = %e, "dropping malformed frame");
                continue;
            }

            let keep_going = on_frame(Frame {
                data: &luma,
                width: self.width,
                height: self.height,
                sequence: meta.sequence,
            });
            pool.give_back(luma);
            delivered += 1;

            if !keep_going {
                break;
            }
        }

        tracing::info!(frames = delivered, allocated = pool.allocated(), "capture stopped");
        Ok(delivered)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

/// Map a negotiated FourCC onto a format whose luma plane can be extracted.
pub fn pixel_format_for(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"NV12" | b"NV21" => Some(PixelFormat::Nv12),
        b"YUYV" => Some(PixelFormat::Yuyv),
        b"GREY" => Some(PixelFormat::Grey),
        b"Y16 " | b"Y16\0" => Some(PixelFormat::Y16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_mapping() {
        assert_eq!(pixel_format_for(FourCC::new(b"NV21")), Some(PixelFormat::Nv12));
        assert_eq!(pixel_format_for(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(pixel_format_for(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(pixel_format_for(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/does-not-exist-video", CaptureRequest::default())
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
