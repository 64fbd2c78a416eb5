//! UVC-Cap: lifecycle-managed handles for UVC capture devices
//!
//! A [`DeviceRegistry`] hands out one [`CameraHandle`] per device index. Each
//! handle serializes access to its device, refuses out-of-order operations,
//! and closes the device on release or drop. The native capture layer sits
//! behind the [`DeviceBackend`]/[`CameraDevice`] traits, with a V4L2 backend
//! for real hardware and a mock backend for tests.

pub mod config;
pub mod device;
pub mod format;
pub mod handle;
pub mod logs;
pub mod mock;
pub mod registry;
pub mod traits;

pub use config::CaptureConfig;
pub use device::{V4L2Backend, V4L2Device};
pub use format::{FourCC, FrameSize, PixelFormat};
pub use handle::{CameraHandle, LifecycleState};
pub use registry::DeviceRegistry;
pub use traits::{CameraDevice, CameraError, DeviceBackend, DeviceCapabilities, Result};
