//! Pixel formats, their native codes, and frame size enumeration.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::traits::{CameraDevice, CameraError};

/// Native code reported for formats outside the supported set.
pub const UNKNOWN_CODE: i32 = -1;

/// Four-character pixel layout tag used by V4L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// RGB 5-6-5, 16 bits per pixel.
    pub const RGBP: Self = Self::new(b"RGBP");
    /// RGB 8-8-8-8, 32 bits per pixel.
    pub const RGB4: Self = Self::new(b"RGB4");
    /// BGR 8-8-8-8, 32 bits per pixel.
    pub const BGR4: Self = Self::new(b"BGR4");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// UYVY pixel format (4:2:2 packed).
    pub const UYVY: Self = Self::new(b"UYVY");
    /// Planar YUV 4:2:0.
    pub const YU12: Self = Self::new(b"YU12");
    /// Planar YUV 4:1:0.
    pub const YUV9: Self = Self::new(b"YUV9");
    /// Planar YUV 4:2:2.
    pub const P422: Self = Self::new(b"422P");
    /// Y plane followed by interleaved CbCr.
    pub const NV12: Self = Self::new(b"NV12");
    /// Y plane followed by interleaved CrCb.
    pub const NV21: Self = Self::new(b"NV21");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel layouts a capture can be negotiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGB 5-6-5.
    Rgb565,
    /// 32-bit RGB.
    Rgb32,
    /// 32-bit BGR.
    Bgr32,
    /// Packed YUV 4:2:2, Y0 U Y1 V.
    Yuyv,
    /// Packed YUV 4:2:2, U Y0 V Y1.
    Uyvy,
    /// Planar YUV 4:2:0.
    Yuv420,
    /// Planar YUV 4:1:0.
    Yuv410,
    /// Planar YUV 4:2:2.
    Yuv422p,
    /// Semi-planar YUV 4:2:0, CbCr order.
    Nv12,
    /// Semi-planar YUV 4:2:0, CrCb order.
    Nv21,
    /// Anything the native layer reports outside the set above.
    Unknown,
}

impl PixelFormat {
    /// Every requestable format, in native code order.
    pub const ALL: [Self; 10] = [
        Self::Rgb565,
        Self::Rgb32,
        Self::Bgr32,
        Self::Yuyv,
        Self::Uyvy,
        Self::Yuv420,
        Self::Yuv410,
        Self::Yuv422p,
        Self::Nv12,
        Self::Nv21,
    ];

    /// Decode a native format code. Total: unrecognized codes give `Unknown`.
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Rgb565,
            1 => Self::Rgb32,
            2 => Self::Bgr32,
            3 => Self::Yuyv,
            4 => Self::Uyvy,
            5 => Self::Yuv420,
            6 => Self::Yuv410,
            7 => Self::Yuv422p,
            8 => Self::Nv12,
            9 => Self::Nv21,
            _ => Self::Unknown,
        }
    }

    /// Native code for this format; `None` for `Unknown`, which cannot be requested.
    pub const fn code(self) -> Option<i32> {
        match self {
            Self::Rgb565 => Some(0),
            Self::Rgb32 => Some(1),
            Self::Bgr32 => Some(2),
            Self::Yuyv => Some(3),
            Self::Uyvy => Some(4),
            Self::Yuv420 => Some(5),
            Self::Yuv410 => Some(6),
            Self::Yuv422p => Some(7),
            Self::Nv12 => Some(8),
            Self::Nv21 => Some(9),
            Self::Unknown => None,
        }
    }

    /// V4L2 fourcc for this format.
    pub const fn fourcc(self) -> Option<FourCC> {
        match self {
            Self::Rgb565 => Some(FourCC::RGBP),
            Self::Rgb32 => Some(FourCC::RGB4),
            Self::Bgr32 => Some(FourCC::BGR4),
            Self::Yuyv => Some(FourCC::YUYV),
            Self::Uyvy => Some(FourCC::UYVY),
            Self::Yuv420 => Some(FourCC::YU12),
            Self::Yuv410 => Some(FourCC::YUV9),
            Self::Yuv422p => Some(FourCC::P422),
            Self::Nv12 => Some(FourCC::NV12),
            Self::Nv21 => Some(FourCC::NV21),
            Self::Unknown => None,
        }
    }

    /// Format for a V4L2 fourcc, `Unknown` if unsupported.
    pub fn from_fourcc(fourcc: FourCC) -> Self {
        Self::ALL
            .into_iter()
            .find(|format| format.fourcc() == Some(fourcc))
            .unwrap_or(Self::Unknown)
    }

    /// Bits used per pixel, averaged over subsampled planes.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::Rgb565 | Self::Yuyv | Self::Uyvy | Self::Yuv422p => 16,
            Self::Rgb32 | Self::Bgr32 => 32,
            Self::Yuv420 | Self::Nv12 | Self::Nv21 => 12,
            Self::Yuv410 => 9,
            Self::Unknown => 0,
        }
    }

    /// Bytes in one `width` x `height` frame, or `None` on overflow.
    pub fn frame_bytes(self, width: u32, height: u32) -> Option<u32> {
        let bits = u64::from(width) * u64::from(height) * u64::from(self.bits_per_pixel());
        u32::try_from(bits.div_ceil(8)).ok()
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Rgb565 => "rgb565",
            Self::Rgb32 => "rgb32",
            Self::Bgr32 => "bgr32",
            Self::Yuyv => "yuyv",
            Self::Uyvy => "uyvy",
            Self::Yuv420 => "yuv420",
            Self::Yuv410 => "yuv410",
            Self::Yuv422p => "yuv422p",
            Self::Nv12 => "nv12",
            Self::Nv21 => "nv21",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.name() == lower)
            .ok_or_else(|| CameraError::invalid_argument(format!("unknown pixel format '{s}'")))
    }
}

/// Decode a native format code.
pub const fn decode(code: i32) -> PixelFormat {
    PixelFormat::from_code(code)
}

/// A frame size reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    width: u32,
    height: u32,
}

impl FrameSize {
    /// Width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Lazily walks the frame sizes a device supports for one format.
///
/// Ends at the native layer's "no more" answer, or after `limit` indices.
pub struct FrameSizes<'a, D: ?Sized> {
    device: &'a D,
    format_code: i32,
    index: u32,
    limit: u32,
    done: bool,
}

impl<D: CameraDevice + ?Sized> Iterator for FrameSizes<'_, D> {
    type Item = FrameSize;

    fn next(&mut self) -> Option<FrameSize> {
        while !self.done {
            if self.index >= self.limit {
                warn!(
                    limit = self.limit,
                    format_code = self.format_code,
                    "frame size enumeration hit its bound, stopping"
                );
                self.done = true;
                break;
            }

            let index = self.index;
            self.index += 1;

            match self.device.enum_frame_size(index, self.format_code) {
                None => self.done = true,
                Some((0, _) | (_, 0)) => {
                    warn!(index, "device reported an empty frame size, skipping");
                }
                Some((width, height)) => return Some(FrameSize { width, height }),
            }
        }
        None
    }
}

/// Enumerate the frame sizes `device` supports for `format`, starting at index 0.
///
/// `Unknown` has no native code and yields an empty sequence.
pub fn enumerate_frame_sizes<D: CameraDevice + ?Sized>(
    device: &D,
    format: PixelFormat,
    limit: u32,
) -> FrameSizes<'_, D> {
    let code = format.code();
    FrameSizes {
        device,
        format_code: code.unwrap_or(UNKNOWN_CODE),
        index: 0,
        limit,
        done: code.is_none(),
    }
}
