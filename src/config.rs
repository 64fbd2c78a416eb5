//! Capture configuration shared by the registry, handles, and the V4L2 backend.

/// Device node path prefix; index `n` maps to `{prefix}{n}`.
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/video";

/// Memory-mapped buffers requested when streaming starts.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Fewest streaming buffers a driver is asked for.
pub const MIN_BUFFER_COUNT: u32 = 2;

/// Upper bound on frame size enumeration indices.
pub const DEFAULT_MAX_FRAME_SIZES: u32 = 64;

/// Capture configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Prefix used to derive device paths from indices.
    pub device_prefix: String,
    /// Streaming buffers to allocate.
    pub buffer_count: u32,
    /// Maximum number of indices probed when enumerating frame sizes.
    pub max_frame_sizes: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_prefix: DEFAULT_DEVICE_PREFIX.to_owned(),
            buffer_count: DEFAULT_BUFFER_COUNT,
            max_frame_sizes: DEFAULT_MAX_FRAME_SIZES,
        }
    }
}

impl CaptureConfig {
    /// Set the device path prefix.
    #[must_use]
    pub fn with_device_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.device_prefix = prefix.into();
        self
    }

    /// Set the streaming buffer count. Drivers need at least two.
    #[must_use]
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count.max(MIN_BUFFER_COUNT);
        self
    }

    /// Set the frame size enumeration bound.
    #[must_use]
    pub const fn with_max_frame_sizes(mut self, max: u32) -> Self {
        self.max_frame_sizes = max;
        self
    }

    /// Device path for `index`.
    pub fn device_path(&self, index: u32) -> String {
        format!("{}{index}", self.device_prefix)
    }
}
