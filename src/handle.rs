//! Lifecycle-managed handle to one capture device.
//!
//! A [`CameraHandle`] owns at most one open native resource and moves through
//!
//! ```text
//! Closed --open--> Opened --init--> Initialized --capture--> Streaming
//!                    ^                                        |  ^
//!                    +------------------ release -------------+  capture
//! ```
//!
//! Every operation takes the handle's lock, so concurrent callers are
//! serialized. The resource is closed on [`CameraHandle::release`] or, failing
//! that, when the handle is dropped.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_FRAME_SIZES;
use crate::format::{self, FrameSize, PixelFormat};
use crate::traits::{CameraDevice, CameraError, DeviceBackend, Result};

/// Observable lifecycle state of a [`CameraHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No native resource is held.
    Closed,
    /// Device is open, format not negotiated.
    Opened,
    /// Format negotiated, streaming not started.
    Initialized,
    /// Streaming; frames can be pulled.
    Streaming,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Initialized => "initialized",
            Self::Streaming => "streaming",
        })
    }
}

// The resource lives inside the state, so it exists iff the state is not Closed.
enum Slot<D> {
    Closed,
    Opened(D),
    Initialized(D),
    Streaming(D),
}

impl<D> Default for Slot<D> {
    fn default() -> Self {
        Self::Closed
    }
}

impl<D> Slot<D> {
    const fn state(&self) -> LifecycleState {
        match self {
            Self::Closed => LifecycleState::Closed,
            Self::Opened(_) => LifecycleState::Opened,
            Self::Initialized(_) => LifecycleState::Initialized,
            Self::Streaming(_) => LifecycleState::Streaming,
        }
    }

    const fn device(&self) -> Option<&D> {
        match self {
            Self::Closed => None,
            Self::Opened(device) | Self::Initialized(device) | Self::Streaming(device) => {
                Some(device)
            }
        }
    }

    fn device_mut(&mut self) -> Option<&mut D> {
        match self {
            Self::Closed => None,
            Self::Opened(device) | Self::Initialized(device) | Self::Streaming(device) => {
                Some(device)
            }
        }
    }

    fn take(&mut self) -> Option<D> {
        match mem::take(self) {
            Self::Closed => None,
            Self::Opened(device) | Self::Initialized(device) | Self::Streaming(device) => {
                Some(device)
            }
        }
    }

    /// Re-tag the held resource. Only release reaches `Closed`, so it maps to `Opened` here.
    fn advance(&mut self, to: LifecycleState) {
        let Some(device) = self.take() else {
            return;
        };
        *self = match to {
            LifecycleState::Closed | LifecycleState::Opened => Self::Opened(device),
            LifecycleState::Initialized => Self::Initialized(device),
            LifecycleState::Streaming => Self::Streaming(device),
        };
    }
}

/// A serialized, lifecycle-checked handle to one capture device.
pub struct CameraHandle<B: DeviceBackend> {
    device_path: String,
    backend: Arc<B>,
    frame_size_limit: u32,
    slot: Mutex<Slot<B::Device>>,
}

impl<B: DeviceBackend> CameraHandle<B> {
    /// Create a closed handle for `device_path`.
    pub fn new<S: Into<String>>(backend: Arc<B>, device_path: S) -> Self {
        Self {
            device_path: device_path.into(),
            backend,
            frame_size_limit: DEFAULT_MAX_FRAME_SIZES,
            slot: Mutex::new(Slot::Closed),
        }
    }

    /// Create a handle for `device_path` and open it.
    pub fn open_path<S: Into<String>>(backend: Arc<B>, device_path: S) -> Result<Self> {
        let handle = Self::new(backend, device_path);
        handle.open()?;
        Ok(handle)
    }

    /// Set how many indices frame size enumeration may probe.
    #[must_use]
    pub fn with_frame_size_limit(mut self, limit: u32) -> Self {
        self.frame_size_limit = limit;
        self
    }

    /// Device node this handle is bound to.
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lock().state()
    }

    /// Open the device. Only legal while closed.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.lock();
        match slot.state() {
            LifecycleState::Closed => self.open_locked(&mut slot),
            state => Err(CameraError::InvalidState {
                operation: "open",
                state,
            }),
        }
    }

    /// Open the device unless it is already open.
    pub fn ensure_open(&self) -> Result<()> {
        let mut slot = self.lock();
        if slot.state() == LifecycleState::Closed {
            self.open_locked(&mut slot)?;
        }
        Ok(())
    }

    fn open_locked(&self, slot: &mut Slot<B::Device>) -> Result<()> {
        let device = self.backend.open(&self.device_path)?;
        *slot = Slot::Opened(device);
        info!(path = %self.device_path, "device opened");
        Ok(())
    }

    /// Negotiate capture geometry and pixel format.
    ///
    /// From `Initialized` or `Streaming` the handle first returns to `Opened`
    /// (stopping the stream if needed), then renegotiates. On failure the
    /// handle is left `Opened`.
    pub fn init(&self, width: u32, height: u32, format: PixelFormat) -> Result<()> {
        let code = format.code().ok_or_else(|| {
            CameraError::invalid_argument(format!("pixel format {format} cannot be requested"))
        })?;
        if width == 0 || height == 0 {
            return Err(CameraError::invalid_argument(format!(
                "frame geometry {width}x{height} must be non-zero"
            )));
        }

        let mut slot = self.lock();
        match slot.state() {
            LifecycleState::Closed => {
                return Err(CameraError::InvalidState {
                    operation: "init",
                    state: LifecycleState::Closed,
                });
            }
            LifecycleState::Opened => {}
            LifecycleState::Initialized => {
                debug!(path = %self.device_path, "renegotiating format");
                slot.advance(LifecycleState::Opened);
            }
            LifecycleState::Streaming => {
                debug!(path = %self.device_path, "stopping stream to renegotiate format");
                if let Some(device) = slot.device_mut() {
                    device.stop();
                }
                slot.advance(LifecycleState::Opened);
            }
        }

        let Some(device) = slot.device_mut() else {
            return Err(CameraError::InvalidState {
                operation: "init",
                state: LifecycleState::Closed,
            });
        };
        device.init(width, height, code)?;
        slot.advance(LifecycleState::Initialized);

        debug!(path = %self.device_path, width, height, %format, "format negotiated");
        Ok(())
    }

    /// Capture one frame into `buffer`.
    ///
    /// The first capture after `init` starts streaming. `buffer` must hold at
    /// least [`frame_size`](Self::frame_size) bytes.
    pub fn capture(&self, buffer: &mut [u8]) -> Result<()> {
        let mut slot = self.lock();
        let state = slot.state();
        let device = match (state, slot.device_mut()) {
            (LifecycleState::Initialized | LifecycleState::Streaming, Some(device)) => device,
            _ => {
                return Err(CameraError::InvalidState {
                    operation: "capture",
                    state,
                });
            }
        };

        let needed = usize::try_from(device.frame_size()).unwrap_or(usize::MAX);
        if buffer.len() < needed {
            return Err(CameraError::invalid_argument(format!(
                "buffer holds {} bytes, frame needs {needed}",
                buffer.len()
            )));
        }

        if state == LifecycleState::Initialized {
            device.start()?;
            slot.advance(LifecycleState::Streaming);
            debug!(path = %self.device_path, "streaming started");
        }

        slot.device_mut()
            .map_or(Ok(()), |device| device.capture(buffer))
    }

    /// Release the device. Safe to call any number of times, from any state.
    pub fn release(&self) {
        let mut slot = self.lock();
        release_slot(&mut slot, &self.device_path);
    }

    /// Negotiated pixel format.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.query("query pixel format", |device| {
            format::decode(device.pixel_format())
        })
    }

    /// Size in bytes of one frame.
    pub fn frame_size(&self) -> Result<u32> {
        self.query("query frame size", |device| device.frame_size())
    }

    /// Negotiated frame width.
    pub fn width(&self) -> Result<u32> {
        self.query("query width", |device| device.width())
    }

    /// Negotiated frame height.
    pub fn height(&self) -> Result<u32> {
        self.query("query height", |device| device.height())
    }

    /// Frame sizes the device supports for `format`.
    pub fn supported_preview_sizes(&self, format: PixelFormat) -> Result<Vec<FrameSize>> {
        if format == PixelFormat::Unknown {
            return Err(CameraError::invalid_argument(
                "cannot enumerate sizes for an unknown pixel format",
            ));
        }
        let limit = self.frame_size_limit;
        self.query("enumerate frame sizes", |device| {
            format::enumerate_frame_sizes(device, format, limit).collect()
        })
    }

    fn query<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&B::Device) -> T,
    {
        let slot = self.lock();
        slot.device().map(f).ok_or(CameraError::InvalidState {
            operation,
            state: LifecycleState::Closed,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Slot<B::Device>> {
        // Transitions never leave the slot half-updated, so a poisoned lock is still consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: DeviceBackend> fmt::Debug for CameraHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraHandle")
            .field("device_path", &self.device_path)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<B: DeviceBackend> Drop for CameraHandle<B> {
    fn drop(&mut self) {
        let slot = self
            .slot
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        release_slot(slot, &self.device_path);
    }
}

fn release_slot<D: CameraDevice>(slot: &mut Slot<D>, path: &str) {
    let was_streaming = slot.state() == LifecycleState::Streaming;
    let Some(mut device) = slot.take() else {
        debug!(path, "release on closed handle");
        return;
    };

    if was_streaming {
        device.stop();
    }
    if let Err(err) = device.close() {
        warn!(path, error = %err, "device close failed");
    }
    info!(path, "device released");
}
