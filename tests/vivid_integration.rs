//! Integration tests using the vivid virtual camera.
//!
//! These tests require:
//! - The `integration` feature flag: `cargo test --features integration`
//! - The vivid kernel module loaded, e.g. `sudo modprobe vivid n_devs=2`
//! - Access to /dev/video* devices (may require sudo or video group membership)
//!
//! Tests fail if vivid is not available.

#![cfg(feature = "integration")]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serial_test::serial;
use uvc_cap::{
    CameraHandle, CaptureConfig, DeviceRegistry, LifecycleState, PixelFormat, V4L2Backend,
    V4L2Device,
};

/// Find the indices of all vivid capture nodes.
///
/// Checks the sysfs name before opening so real cameras are left alone.
fn find_vivid_devices() -> Vec<u32> {
    let video4linux = Path::new("/sys/class/video4linux");
    if !video4linux.exists() {
        return Vec::new();
    }

    let mut devices = Vec::new();
    for index in 0..16 {
        let name_path = video4linux.join(format!("video{index}")).join("name");
        let Ok(name) = fs::read_to_string(&name_path) else {
            continue;
        };

        if !name.to_lowercase().contains("vivid") {
            continue;
        }

        // vivid also registers output and metadata nodes
        if V4L2Device::open(&format!("/dev/video{index}"), 2).is_ok() {
            devices.push(index);
        }
    }
    devices
}

/// First vivid capture index. Integration runs must fail, not skip, without vivid.
fn require_vivid() -> u32 {
    find_vivid_devices().first().copied().expect(
        "vivid virtual camera not available.\n\
         Load vivid with: sudo modprobe vivid n_devs=2\n\
         Or run unit tests only: cargo test --lib",
    )
}

fn vivid_path(index: u32) -> String {
    CaptureConfig::default().device_path(index)
}

#[test]
#[serial]
fn test_vivid_device_capabilities() {
    let index = require_vivid();

    let device = V4L2Device::open(&vivid_path(index), 4).expect("Failed to open vivid device");
    let caps = device.capabilities();

    assert!(caps.driver.contains("vivid"), "Expected vivid driver");
    assert!(caps.can_capture, "vivid should support capture");
    assert!(caps.can_stream, "vivid should support streaming");

    println!("Opened vivid device:");
    println!("  Driver: {}", caps.driver);
    println!("  Card: {}", caps.card);
    println!("  Bus: {}", caps.bus_info);
}

#[test]
#[serial]
fn test_vivid_init_and_capture() {
    let index = require_vivid();
    let registry = DeviceRegistry::new(V4L2Backend::default());

    let camera = registry
        .open(i32::try_from(index).expect("index fits i32"))
        .expect("Failed to open vivid device");
    assert_eq!(camera.state(), LifecycleState::Opened);

    camera
        .init(640, 480, PixelFormat::Yuyv)
        .expect("Failed to init 640x480 YUYV");
    assert_eq!(camera.width().expect("width"), 640);
    assert_eq!(camera.height().expect("height"), 480);
    assert_eq!(camera.pixel_format().expect("format"), PixelFormat::Yuyv);

    let frame_size = camera.frame_size().expect("frame size");
    assert!(frame_size >= 640 * 480 * 2, "frame too small: {frame_size}");

    let mut buffer = vec![0u8; frame_size as usize];
    for i in 0..10 {
        camera.capture(&mut buffer).expect("Failed to capture frame");
        println!("Frame {i}: {} bytes", buffer.len());
    }
    assert_eq!(camera.state(), LifecycleState::Streaming);
    assert!(buffer.iter().any(|&b| b != 0), "frame is all zeros");

    camera.release();
    let err = camera
        .capture(&mut buffer)
        .expect_err("capture after release must fail");
    assert!(err.is_invalid_state());
}

#[test]
#[serial]
fn test_vivid_preview_sizes() {
    let index = require_vivid();
    let camera = CameraHandle::open_path(Arc::new(V4L2Backend::default()), vivid_path(index))
        .expect("Failed to open vivid device");

    let sizes = camera
        .supported_preview_sizes(PixelFormat::Yuyv)
        .expect("Failed to enumerate sizes");
    for size in &sizes {
        println!("  {size}");
    }

    assert!(!sizes.is_empty(), "vivid should report frame sizes");
    assert!(sizes.iter().all(|s| s.width() > 0 && s.height() > 0));
}

#[test]
#[serial]
fn test_vivid_reinit_while_streaming() {
    let index = require_vivid();
    let camera = CameraHandle::open_path(Arc::new(V4L2Backend::default()), vivid_path(index))
        .expect("Failed to open vivid device");

    camera.init(640, 480, PixelFormat::Yuyv).expect("first init");
    let mut buffer = vec![0u8; camera.frame_size().expect("frame size") as usize];
    camera.capture(&mut buffer).expect("capture at 640x480");

    camera.init(320, 240, PixelFormat::Yuyv).expect("re-init");
    assert_eq!(camera.state(), LifecycleState::Initialized);
    assert_eq!(camera.width().expect("width"), 320);

    let mut buffer = vec![0u8; camera.frame_size().expect("frame size") as usize];
    camera.capture(&mut buffer).expect("capture at 320x240");
}

#[test]
#[serial]
fn test_vivid_reopen_after_release() {
    let index = require_vivid();
    let registry = DeviceRegistry::new(V4L2Backend::default());
    let index = i32::try_from(index).expect("index fits i32");

    let camera = registry.open(index).expect("first open");
    camera.init(640, 480, PixelFormat::Yuyv).expect("init");
    camera.release();
    assert_eq!(camera.state(), LifecycleState::Closed);

    let again = registry.open(index).expect("reopen");
    assert!(Arc::ptr_eq(&camera, &again));
    assert_eq!(again.state(), LifecycleState::Opened);
}

#[test]
#[serial]
fn test_vivid_open_is_exclusive() {
    let index = require_vivid();
    let backend = Arc::new(V4L2Backend::default());
    let path = vivid_path(index);

    let camera = CameraHandle::open_path(Arc::clone(&backend), path.as_str())
        .expect("Failed to open vivid device");
    assert!(backend.is_held(&path));

    let err = CameraHandle::open_path(Arc::clone(&backend), path.as_str())
        .expect_err("second handle on the same node must fail");
    assert!(err.to_string().contains("busy"), "unexpected error: {err}");

    camera.release();
    assert!(!backend.is_held(&path));
    CameraHandle::open_path(backend, path).expect("open after release");
}
