//! Mock backend for testing without hardware.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::format::PixelFormat;
use crate::traits::{CameraDevice, DeviceBackend, Result};

/// Native calls observed by a [`MockBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// Successful and failed `open` calls.
    pub open: u32,
    /// `init` calls.
    pub init: u32,
    /// `start` calls.
    pub start: u32,
    /// `stop` calls.
    pub stop: u32,
    /// `capture` calls.
    pub capture: u32,
    /// `close` calls.
    pub close: u32,
}

#[derive(Debug, Default)]
struct Shared {
    calls: CallCounts,
    held: HashSet<String>,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// In-memory backend whose devices record every native call.
#[derive(Debug)]
pub struct MockBackend {
    frame_sizes: Vec<(u32, u32)>,
    endless_sizes: bool,
    missing: HashSet<String>,
    fail_init: bool,
    fail_start: bool,
    fail_close: bool,
    pattern: TestPattern,
    shared: Arc<Mutex<Shared>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a backend whose devices support a few common YUYV sizes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_sizes: vec![(1280, 720), (640, 480), (320, 240), (160, 120)],
            endless_sizes: false,
            missing: HashSet::new(),
            fail_init: false,
            fail_start: false,
            fail_close: false,
            pattern: TestPattern::ColorBars,
            shared: Arc::default(),
        }
    }

    /// Set the frame sizes devices report and accept.
    #[must_use]
    pub fn with_frame_sizes(mut self, sizes: &[(u32, u32)]) -> Self {
        self.frame_sizes = sizes.to_vec();
        self
    }

    /// Answer every enumeration index, like a misbehaving driver.
    #[must_use]
    pub const fn with_endless_frame_sizes(mut self) -> Self {
        self.endless_sizes = true;
        self
    }

    /// Make opening `path` fail as if the node did not exist.
    #[must_use]
    pub fn with_missing_device(mut self, path: &str) -> Self {
        self.missing.insert(path.to_owned());
        self
    }

    /// Make every `init` fail.
    #[must_use]
    pub const fn with_failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make every `start` fail.
    #[must_use]
    pub const fn with_failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Make every `close` report an error after releasing the device.
    #[must_use]
    pub const fn with_failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Set the pattern written into captured frames.
    #[must_use]
    pub const fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Snapshot of the native calls made so far.
    pub fn calls(&self) -> CallCounts {
        lock(&self.shared).calls
    }

    /// Whether a device is currently open at `path`.
    pub fn is_held(&self, path: &str) -> bool {
        lock(&self.shared).held.contains(path)
    }
}

impl DeviceBackend for MockBackend {
    type Device = MockDevice;

    fn open(&self, path: &str) -> Result<MockDevice> {
        let mut shared = lock(&self.shared);
        shared.calls.open += 1;

        if self.missing.contains(path) {
            return Err(
                io::Error::new(io::ErrorKind::NotFound, format!("{path}: no such device")).into(),
            );
        }
        if !shared.held.insert(path.to_owned()) {
            return Err(io::Error::other(format!("{path}: device busy")).into());
        }

        Ok(MockDevice {
            path: path.to_owned(),
            frame_sizes: self.frame_sizes.clone(),
            endless_sizes: self.endless_sizes,
            fail_init: self.fail_init,
            fail_start: self.fail_start,
            fail_close: self.fail_close,
            pattern: self.pattern,
            format: None,
            streaming: false,
            sequence: 0,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Mock device for testing without hardware.
#[derive(Debug)]
pub struct MockDevice {
    path: String,
    frame_sizes: Vec<(u32, u32)>,
    endless_sizes: bool,
    fail_init: bool,
    fail_start: bool,
    fail_close: bool,
    pattern: TestPattern,
    format: Option<(u32, u32, PixelFormat)>,
    streaming: bool,
    sequence: u32,
    shared: Arc<Mutex<Shared>>,
}

impl MockDevice {
    /// Frames delivered since open.
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }

    fn record<F: FnOnce(&mut CallCounts)>(&self, f: F) {
        f(&mut lock(&self.shared).calls);
    }

    fn supports(&self, width: u32, height: u32) -> bool {
        self.endless_sizes || self.frame_sizes.contains(&(width, height))
    }
}

impl CameraDevice for MockDevice {
    fn init(&mut self, width: u32, height: u32, format_code: i32) -> Result<()> {
        self.record(|calls| calls.init += 1);

        if self.fail_init {
            return Err(io::Error::other("mock init failure").into());
        }
        let format = PixelFormat::from_code(format_code);
        if format == PixelFormat::Unknown {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported format code {format_code}"),
            )
            .into());
        }
        if !self.supports(width, height) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported geometry {width}x{height}"),
            )
            .into());
        }

        self.format = Some((width, height, format));
        self.streaming = false;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.record(|calls| calls.start += 1);

        if self.fail_start {
            return Err(io::Error::other("mock start failure").into());
        }
        if self.format.is_none() {
            return Err(io::Error::other("start before init").into());
        }
        self.streaming = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.record(|calls| calls.stop += 1);
        self.streaming = false;
    }

    fn capture(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.record(|calls| calls.capture += 1);

        let Some((width, height, format)) = self.format else {
            return Err(io::Error::other("capture before init").into());
        };
        if !self.streaming {
            return Err(io::Error::other("capture while not streaming").into());
        }

        let size = usize::try_from(self.frame_size()).unwrap_or(usize::MAX);
        let (frame, _) = buffer.split_at_mut(size.min(buffer.len()));
        if format == PixelFormat::Yuyv {
            fill_pattern(frame, width, height, self.pattern);
        } else {
            frame.fill(0x80);
        }
        self.sequence += 1;
        Ok(())
    }

    fn pixel_format(&self) -> i32 {
        self.format
            .and_then(|(_, _, format)| format.code())
            .unwrap_or(crate::format::UNKNOWN_CODE)
    }

    fn frame_size(&self) -> u32 {
        self.format
            .and_then(|(width, height, format)| format.frame_bytes(width, height))
            .unwrap_or(0)
    }

    fn width(&self) -> u32 {
        self.format.map_or(0, |(width, _, _)| width)
    }

    fn height(&self) -> u32 {
        self.format.map_or(0, |(_, height, _)| height)
    }

    fn enum_frame_size(&self, index: u32, format_code: i32) -> Option<(u32, u32)> {
        if PixelFormat::from_code(format_code) == PixelFormat::Unknown {
            return None;
        }
        if self.endless_sizes {
            let step = index.saturating_add(1);
            return Some((step.saturating_mul(16), step.saturating_mul(9)));
        }
        self.frame_sizes
            .get(usize::try_from(index).ok()?)
            .copied()
    }

    fn close(self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.calls.close += 1;
        shared.held.remove(&self.path);
        drop(shared);

        if self.fail_close {
            return Err(io::Error::other("mock close failure").into());
        }
        Ok(())
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write `pattern` into a YUYV frame.
fn fill_pattern(data: &mut [u8], width: u32, height: u32, pattern: TestPattern) {
    match pattern {
        TestPattern::ColorBars => generate_color_bars(data, width, height),
        TestPattern::Gradient => generate_gradient(data, width, height),
        TestPattern::Solid(y, u, v) => generate_solid(data, y, u, v),
    }
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    const BARS: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let pairs_per_row = (width / 2).max(1) as usize;
    let bar_width = (pairs_per_row / BARS.len()).max(1);
    let rows = height as usize;

    for (i, pair) in data.chunks_exact_mut(4).take(pairs_per_row * rows).enumerate() {
        let bar = ((i % pairs_per_row) / bar_width).min(BARS.len() - 1);
        let (y, u, v) = BARS.get(bar).copied().unwrap_or((16, 128, 128));
        pair.copy_from_slice(&[y, u, y, v]);
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    let pairs_per_row = (width / 2).max(1) as usize;
    let rows = height as usize;

    for (i, pair) in data.chunks_exact_mut(4).take(pairs_per_row * rows).enumerate() {
        let x = (i % pairs_per_row) * 255 / pairs_per_row;
        let y = u8::try_from(x).unwrap_or(u8::MAX);
        pair.copy_from_slice(&[y, 128, y, 128]);
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for pair in data.chunks_exact_mut(4) {
        pair.copy_from_slice(&[y, u, y, v]);
    }
}
