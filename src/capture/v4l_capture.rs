use super::CaptureSource;
use anyhow::{bail, Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use std::path::Path;

const HINT_FPS: u32 = 30;

pub struct WebcamCapture {
    camera: Camera,
    streaming: bool,
}

impl WebcamCapture {
    /// Open `device` (an index, `/dev/videoN`, or a symlink to one) and ask
    /// for `width`x`height`. The device is free to pick something else.
    pub fn new(device: &str, width: u32, height: u32) -> Result<Self> {
        tracing::info!("Initializing webcam {} at {}x{}", device, width, height);

        let index = CameraIndex::Index(device_index(device)?);
        let mut camera = open_with_hint(&index, width, height)
            .with_context(|| format!("Failed to open camera {device}"))?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        tracing::info!("Webcam {} initialized successfully", device);

        Ok(Self {
            camera,
            streaming: true,
        })
    }
}

/// Try the closest MJPEG mode first, then whatever the device likes best.
fn open_with_hint(index: &CameraIndex, width: u32, height: u32) -> Result<Camera> {
    let attempts = [
        RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::MJPEG,
            HINT_FPS,
        )),
        RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::YUYV,
            HINT_FPS,
        )),
        RequestedFormatType::AbsoluteHighestResolution,
    ];

    let mut last_error = None;
    for (attempt, kind) in attempts.into_iter().enumerate() {
        match Camera::new(index.clone(), RequestedFormat::new::<RgbFormat>(kind)) {
            Ok(camera) => return Ok(camera),
            Err(e) => {
                tracing::debug!("format request #{} rejected: {}", attempt, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e.into()),
        None => bail!("no format requests attempted"),
    }
}

/// Resolve a device identifier to a V4L index.
///
/// Accepts a bare index, a `/dev/videoN` node, or any symlink that resolves
/// to one (`/dev/v4l/by-path/...`, `/dev/v4l/by-id/...`).
pub fn device_index(device: &str) -> Result<u32> {
    if let Ok(index) = device.trim().parse::<u32>() {
        return Ok(index);
    }

    let resolved = Path::new(device)
        .canonicalize()
        .with_context(|| format!("Failed to resolve device path {device}"))?;

    resolved
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix("video"))
        .and_then(|n| n.parse::<u32>().ok())
        .with_context(|| format!("{} is not a video device node", resolved.display()))
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let frame = self
            .camera
            .frame()
            .context("Failed to capture frame")?;

        let decoded = frame
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        Ok(decoded)
    }

    fn resolution(&self) -> (u32, u32) {
        let res = self.camera.resolution();
        (res.width(), res.height())
    }

    fn release(&mut self) -> Result<()> {
        if self.streaming {
            self.streaming = false;
            self.camera
                .stop_stream()
                .context("Failed to stop camera stream")?;
        }
        Ok(())
    }
}
