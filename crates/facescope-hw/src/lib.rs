//! facescope-hw: Camera capture for the live preview.
//!
//! V4L2 streaming with luma-plane extraction and a buffer pool that is
//! refilled only after each frame has been fully processed.

pub mod camera;
pub mod frame;
pub mod pool;

pub use camera::{Camera, CameraError, CaptureRequest, DeviceInfo};
pub use frame::{Frame, PixelFormat};
pub use pool::BufferPool;
