use super::PreviewSurface;
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, FourCC};

/// Preview written to a v4l2loopback device, viewable with any video player.
pub struct LoopbackPreview {
    name: String,
    file: Option<File>,
    width: u32,
    height: u32,
}

impl LoopbackPreview {
    pub fn new<P: AsRef<Path>>(
        name: impl Into<String>,
        device_path: P,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let name = name.into();
        let path = device_path.as_ref();
        tracing::info!(
            "Opening preview '{}' on {} ({}x{})",
            name,
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;
        let mut format = Output::format(&device).context("Failed to query output format")?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"YUYV");
        let applied = Output::set_format(&device, &format).context("Failed to set output format")?;
        if (applied.width, applied.height) != (width, height) {
            tracing::warn!(
                "{} accepted {}x{} instead of {}x{}",
                path.display(),
                applied.width,
                applied.height,
                width,
                height
            );
        }

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            name,
            file: Some(file),
            width: applied.width,
            height: applied.height,
        })
    }
}

/// Pack an RGB frame as YUYV (YUV 4:2:2), the format v4l2loopback consumers expect.
pub(crate) fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
    let (width, height) = rgb_image.dimensions();
    let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = rgb_image.get_pixel(x, y);
            let pixel2 = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
            let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);

            // Chroma is shared by the pair
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            yuyv.extend_from_slice(&[y1, u, y2, v]);
        }
    }

    yuyv
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl PreviewSurface for LoopbackPreview {
    fn name(&self) -> &str {
        &self.name
    }

    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        // The device may deliver a size other than the one requested
        let yuyv_data = if frame.dimensions() != (self.width, self.height) {
            let resized = image::imageops::resize(
                frame,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
            rgb_to_yuyv(&resized)
        } else {
            rgb_to_yuyv(frame)
        };

        file.write_all(&yuyv_data)
            .with_context(|| format!("Failed to write preview frame for {}", self.name))?;

        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!("preview '{}' closed", self.name);
        }
    }
}
