//! Core traits and error types for the native capture boundary.
//!
//! A [`DeviceBackend`] opens device nodes; each open node is a
//! [`CameraDevice`], the exclusively owned native resource that a
//! [`CameraHandle`](crate::handle::CameraHandle) drives.

use thiserror::Error;

use crate::handle::LifecycleState;

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// An argument was rejected before reaching the native layer.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation is not legal in the handle's current state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State the handle was in.
        state: LifecycleState,
    },
    /// The native layer reported a failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    pub(crate) fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns `true` for [`CameraError::InvalidState`].
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Device capability flags reported at open time.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Opens native capture resources by device path.
///
/// One backend is shared by every handle it opens, so implementations must be
/// safe to call from several threads.
pub trait DeviceBackend: Send + Sync {
    /// The open-device resource produced by [`DeviceBackend::open`].
    type Device: CameraDevice;

    /// Open the device node at `path`.
    ///
    /// Fails with an I/O error when the node is missing, not permitted, or
    /// already held exclusively.
    fn open(&self, path: &str) -> Result<Self::Device>;
}

/// Operations on one open native capture resource.
///
/// Calls are never concurrent: the owning handle serializes them.
pub trait CameraDevice: Send {
    /// Negotiate capture geometry and pixel format (native format code).
    fn init(&mut self, width: u32, height: u32, format_code: i32) -> Result<()>;

    /// Start streaming. Called once before the first frame pull.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming.
    fn stop(&mut self);

    /// Fill `buffer` with one frame of raw pixel data.
    fn capture(&mut self, buffer: &mut [u8]) -> Result<()>;

    /// Current native pixel format code, `-1` when unrecognized.
    fn pixel_format(&self) -> i32;

    /// Size in bytes of one frame at the negotiated format.
    fn frame_size(&self) -> u32;

    /// Negotiated frame width in pixels.
    fn width(&self) -> u32;

    /// Negotiated frame height in pixels.
    fn height(&self) -> u32;

    /// Frame size at `index` for `format_code`, `None` when there are no more.
    fn enum_frame_size(&self, index: u32, format_code: i32) -> Option<(u32, u32)>;

    /// Close the device, consuming the resource.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
