//! uvc-cap binary for exercising a capture device from the command line.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use uvc_cap::logs::{init_logging, LogLevel};
use uvc_cap::mock::MockBackend;
use uvc_cap::{
    CameraHandle, CaptureConfig, DeviceBackend, DeviceRegistry, PixelFormat, V4L2Backend,
};

/// Capture raw frames from a UVC device.
#[derive(Debug, Parser)]
#[command(name = "uvc-cap", version)]
struct Args {
    /// Device index, mapped to `{prefix}{index}`
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    index: i32,

    /// Open this device node instead of an index
    #[arg(short, long, conflicts_with = "index")]
    path: Option<String>,

    /// Device path prefix for index lookups
    #[arg(long, default_value = uvc_cap::config::DEFAULT_DEVICE_PREFIX)]
    prefix: String,

    /// Frame width in pixels
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Pixel format (rgb565, rgb32, bgr32, yuyv, uyvy, yuv420, yuv410, yuv422p, nv12, nv21)
    #[arg(short, long, default_value = "yuyv")]
    format: PixelFormat,

    /// Number of frames to capture
    #[arg(short = 'n', long, default_value_t = 10)]
    frames: u32,

    /// Streaming buffers to allocate
    #[arg(long, default_value_t = uvc_cap::config::DEFAULT_BUFFER_COUNT)]
    buffers: u32,

    /// List supported frame sizes for the format before capturing
    #[arg(long)]
    list_sizes: bool,

    /// Use the in-memory mock backend instead of V4L2
    #[arg(long)]
    mock: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(args.log_level) {
        eprintln!("Error: failed to initialize logging: {err}");
    }

    let config = CaptureConfig::default()
        .with_device_prefix(args.prefix.clone())
        .with_buffer_count(args.buffers);

    let result = if args.mock {
        run(MockBackend::new(), config, &args)
    } else {
        run(V4L2Backend::from_config(&config), config, &args)
    };

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run<B: DeviceBackend>(backend: B, config: CaptureConfig, args: &Args) -> uvc_cap::Result<()> {
    let registry = DeviceRegistry::with_config(backend, config);

    let camera = match &args.path {
        Some(path) => Arc::new(
            CameraHandle::open_path(Arc::clone(registry.backend()), path.as_str())?
                .with_frame_size_limit(registry.config().max_frame_sizes),
        ),
        None => registry.open(args.index)?,
    };

    println!("Device: {}", camera.device_path());

    if args.list_sizes {
        let sizes = camera.supported_preview_sizes(args.format)?;
        println!("Supported sizes for {}:", args.format);
        for size in sizes {
            println!("  {size}");
        }
    }

    camera.init(args.width, args.height, args.format)?;
    println!(
        "Format: {}x{} {} ({} bytes/frame)",
        camera.width()?,
        camera.height()?,
        camera.pixel_format()?,
        camera.frame_size()?
    );

    let mut buffer = vec![0u8; camera.frame_size()? as usize];
    for sequence in 0..args.frames {
        camera.capture(&mut buffer)?;
        println!("Frame {sequence}: {} bytes", buffer.len());
    }

    camera.release();
    info!(frames = args.frames, "capture finished");
    Ok(())
}
