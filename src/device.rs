//! V4L2 backend implementation using the v4l crate.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use v4l::buffer::{Metadata, Type};
use v4l::framesize::{FrameSize as V4lFrameSize, FrameSizeEnum};
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::{CaptureStream as V4lCaptureStream, Stream as V4lStream};
use v4l::video::Capture;
use v4l::Device;

use crate::config::{CaptureConfig, DEFAULT_BUFFER_COUNT, MIN_BUFFER_COUNT};
use crate::format::{FourCC, PixelFormat, UNKNOWN_CODE};
use crate::traits::{CameraDevice, DeviceBackend, DeviceCapabilities, Result};

type HeldPaths = Arc<Mutex<HashSet<String>>>;

/// Opens V4L2 capture nodes, at most one open device per node.
#[derive(Debug, Clone)]
pub struct V4L2Backend {
    buffer_count: u32,
    held: HeldPaths,
}

impl Default for V4L2Backend {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_COUNT)
    }
}

impl V4L2Backend {
    /// Backend that streams through `buffer_count` memory-mapped buffers
    /// (at least [`MIN_BUFFER_COUNT`]).
    pub fn new(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(MIN_BUFFER_COUNT),
            held: Arc::default(),
        }
    }

    /// Backend using the buffer count from `config`.
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.buffer_count)
    }

    /// Buffers requested when streaming starts.
    pub const fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// Whether a device opened through this backend currently holds `path`.
    pub fn is_held(&self, path: &str) -> bool {
        lock_held(&self.held).contains(&canonical_path(path))
    }
}

impl DeviceBackend for V4L2Backend {
    type Device = V4L2Device;

    fn open(&self, path: &str) -> Result<V4L2Device> {
        let claim = PathClaim::acquire(&self.held, path)?;
        V4L2Device::open_claimed(path, self.buffer_count, claim)
    }
}

/// Exclusive hold on a device node, given back on drop.
#[derive(Debug)]
struct PathClaim {
    path: String,
    held: HeldPaths,
}

impl PathClaim {
    fn acquire(held: &HeldPaths, path: &str) -> io::Result<Self> {
        let path = canonical_path(path);
        if !lock_held(held).insert(path.clone()) {
            return Err(io::Error::other(format!("{path}: device busy")));
        }
        Ok(Self {
            path,
            held: Arc::clone(held),
        })
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        lock_held(&self.held).remove(&self.path);
    }
}

// Symlinks such as /dev/v4l/by-id/* resolve to the node they name.
fn canonical_path(path: &str) -> String {
    fs::canonicalize(path).map_or_else(
        |_| path.to_owned(),
        |resolved| resolved.to_string_lossy().into_owned(),
    )
}

fn lock_held(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frame sizes for the last enumerated fourcc, refreshed when index 0 is asked for.
#[derive(Debug, Default)]
struct FrameSizeCache {
    entry: RefCell<Option<(FourCC, Vec<(u32, u32)>)>>,
}

impl FrameSizeCache {
    fn get<F>(&self, index: u32, fourcc: FourCC, fetch: F) -> Option<(u32, u32)>
    where
        F: FnOnce() -> Vec<(u32, u32)>,
    {
        let mut entry = self.entry.borrow_mut();
        let fresh = matches!(entry.as_ref(), Some((cached, _)) if *cached == fourcc);
        if index == 0 || !fresh {
            *entry = Some((fourcc, fetch()));
        }
        let (_, sizes) = entry.as_ref()?;
        sizes.get(usize::try_from(index).ok()?).copied()
    }
}

fn frame_dimensions(size: &V4lFrameSize) -> (u32, u32) {
    match &size.size {
        FrameSizeEnum::Discrete(discrete) => (discrete.width, discrete.height),
        FrameSizeEnum::Stepwise(stepwise) => (stepwise.max_width, stepwise.max_height),
    }
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
    format: Option<v4l::Format>,
    stream: Option<MmapStream<'static>>,
    pending: Option<Vec<u8>>,
    buffer_count: u32,
    frame_sizes: FrameSizeCache,
    _claim: Option<PathClaim>,
}

impl V4L2Device {
    /// Open the V4L2 node at `path` (e.g. `/dev/video0`) outside any backend.
    ///
    /// The node is not marked as held; use [`V4L2Backend`] for exclusive opens.
    pub fn open(path: &str, buffer_count: u32) -> Result<Self> {
        Self::open_with(path, buffer_count, None)
    }

    fn open_claimed(path: &str, buffer_count: u32, claim: PathClaim) -> Result<Self> {
        Self::open_with(path, buffer_count, Some(claim))
    }

    fn open_with(path: &str, buffer_count: u32, claim: Option<PathClaim>) -> Result<Self> {
        let device = Device::with_path(path)?;
        let caps = device.query_caps()?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        if !capabilities.can_capture {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{path} does not support video capture"),
            )
            .into());
        }

        debug!(
            path,
            driver = %capabilities.driver,
            card = %capabilities.card,
            bus = %capabilities.bus_info,
            "queried device capabilities"
        );
        match device.enum_formats() {
            Ok(formats) => {
                for desc in formats {
                    debug!(
                        path,
                        index = desc.index,
                        fourcc = %desc.fourcc,
                        description = %desc.description,
                        "supported pixel format"
                    );
                }
            }
            Err(err) => debug!(path, error = %err, "pixel format enumeration failed"),
        }

        Ok(Self {
            format: device.format().ok(),
            device,
            capabilities,
            stream: None,
            pending: None,
            buffer_count: buffer_count.max(MIN_BUFFER_COUNT),
            frame_sizes: FrameSizeCache::default(),
            _claim: claim,
        })
    }

    /// Capabilities reported when the device was opened.
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn stop_stream(&mut self) -> io::Result<()> {
        self.pending = None;
        match self.stream.take() {
            Some(mut stream) => stream.stop(),
            None => Ok(()),
        }
    }
}

/// Copy the used part of one dequeued buffer into `dst`, returning the byte count.
fn copy_frame(src: &[u8], meta: &Metadata, dst: &mut [u8]) -> usize {
    let used = usize::try_from(meta.bytesused)
        .unwrap_or(usize::MAX)
        .min(src.len())
        .min(dst.len());

    let (src, _) = src.split_at(used);
    let (dst, _) = dst.split_at_mut(used);
    dst.copy_from_slice(src);
    used
}

impl CameraDevice for V4L2Device {
    fn init(&mut self, width: u32, height: u32, format_code: i32) -> Result<()> {
        let fourcc = PixelFormat::from_code(format_code).fourcc().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported format code {format_code}"),
            )
        })?;

        // Buffers are sized for the old format.
        if let Err(err) = self.stop_stream() {
            warn!(error = %err, "failed to stop stream before renegotiating");
        }

        let requested = v4l::Format::new(width, height, fourcc.into());
        let actual = self.device.set_format(&requested)?;
        if actual.width != width || actual.height != height || actual.fourcc != requested.fourcc {
            debug!(
                requested = %requested,
                actual = %actual,
                "driver adjusted the requested format"
            );
        }

        self.format = Some(actual);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;

        // v4l queues every buffer and issues STREAMON on the first pull.
        let (data, meta) = V4lCaptureStream::next(&mut stream)?;
        let mut first = vec![0u8; data.len()];
        let used = copy_frame(data, meta, &mut first);
        first.truncate(used);

        debug!(sequence = meta.sequence, bytes = used, "streaming started");
        self.pending = Some(first);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(err) = self.stop_stream() {
            warn!(error = %err, "failed to stop streaming");
        }
    }

    fn capture(&mut self, buffer: &mut [u8]) -> Result<()> {
        if let Some(first) = self.pending.take() {
            let used = first.len().min(buffer.len());
            let (src, _) = first.split_at(used);
            let (dst, _) = buffer.split_at_mut(used);
            dst.copy_from_slice(src);
            return Ok(());
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::other("capture requested before streaming started"))?;

        let (data, meta) = V4lCaptureStream::next(stream)?;
        copy_frame(data, meta, buffer);
        Ok(())
    }

    fn pixel_format(&self) -> i32 {
        self.format
            .as_ref()
            .and_then(|fmt| PixelFormat::from_fourcc(FourCC::from(fmt.fourcc)).code())
            .unwrap_or(UNKNOWN_CODE)
    }

    fn frame_size(&self) -> u32 {
        self.format.as_ref().map_or(0, |fmt| fmt.size)
    }

    fn width(&self) -> u32 {
        self.format.as_ref().map_or(0, |fmt| fmt.width)
    }

    fn height(&self) -> u32 {
        self.format.as_ref().map_or(0, |fmt| fmt.height)
    }

    fn enum_frame_size(&self, index: u32, format_code: i32) -> Option<(u32, u32)> {
        let fourcc = PixelFormat::from_code(format_code).fourcc()?;
        self.frame_sizes.get(index, fourcc, || {
            match self.device.enum_framesizes(fourcc.into()) {
                Ok(sizes) => sizes.iter().map(frame_dimensions).collect(),
                Err(err) => {
                    debug!(error = %err, "frame size enumeration failed");
                    Vec::new()
                }
            }
        })
    }

    fn close(mut self) -> Result<()> {
        self.stop_stream()?;
        Ok(())
    }
}
