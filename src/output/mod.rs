mod loopback;

pub use loopback::LoopbackPreview;

use anyhow::Result;
use image::RgbImage;

/// A live view of one device's frames
pub trait PreviewSurface {
    /// Name shown to the operator (`camera 0`, `single camera`)
    fn name(&self) -> &str;

    /// Replace the displayed frame
    fn show(&mut self, frame: &RgbImage) -> Result<()>;

    /// Tear the surface down; later calls are no-ops
    fn close(&mut self);
}

/// Surface for runs without a display: frames are counted and dropped.
pub struct HeadlessPreview {
    name: String,
    shown: u64,
}

impl HeadlessPreview {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shown: 0,
        }
    }
}

impl PreviewSurface for HeadlessPreview {
    fn name(&self) -> &str {
        &self.name
    }

    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        if self.shown == 0 {
            let (width, height) = frame.dimensions();
            tracing::debug!("{}: first frame {}x{} (headless)", self.name, width, height);
        }
        self.shown += 1;
        Ok(())
    }

    fn close(&mut self) {
        tracing::debug!("{}: {} frames previewed", self.name, self.shown);
    }
}
