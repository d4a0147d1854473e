mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use image::RgbImage;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame, blocking for at most one frame interval
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Resolution the device actually delivers
    fn resolution(&self) -> (u32, u32);

    /// Stop streaming and release the device
    fn release(&mut self) -> Result<()>;
}

/// What to open for one slot of a capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Label used in previews, logs and file names (`cam0`, `cam1`)
    pub label: String,
    /// Index or platform path of the video device
    pub device: String,
    pub width: u32,
    pub height: u32,
}

/// One read attempt. `image` is `None` when the device yielded nothing.
#[derive(Debug)]
pub struct FrameSample {
    pub image: Option<RgbImage>,
}

impl FrameSample {
    pub fn ok(&self) -> bool {
        self.image.is_some()
    }
}

/// An open video source plus its read bookkeeping.
pub struct DeviceSession<S> {
    spec: DeviceSpec,
    source: Option<S>,
    consecutive_failures: u32,
}

impl<S: CaptureSource> DeviceSession<S> {
    /// Wrap a source that has already been opened with `spec`'s resolution hint.
    pub fn new(spec: DeviceSpec, source: S) -> Self {
        let (width, height) = source.resolution();
        if (width, height) != (spec.width, spec.height) {
            tracing::warn!(
                "{} requested {}x{}, device delivers {}x{}",
                spec.label,
                spec.width,
                spec.height,
                width,
                height
            );
        }

        Self {
            spec,
            source: Some(source),
            consecutive_failures: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Reads since the last successful frame.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn read_frame(&mut self) -> FrameSample {
        let Some(source) = self.source.as_mut() else {
            return FrameSample { image: None };
        };

        match source.capture_frame() {
            Ok(image) => {
                self.consecutive_failures = 0;
                FrameSample { image: Some(image) }
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::debug!(
                    "{}: read failed ({} in a row): {:#}",
                    self.spec.label,
                    self.consecutive_failures,
                    e
                );
                FrameSample { image: None }
            }
        }
    }

    /// Release the device. Calling this on a closed session does nothing.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.release() {
                tracing::warn!("{}: error while closing: {:#}", self.spec.label, e);
            }
            tracing::debug!("{} ({}) closed", self.spec.label, self.spec.device);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_read_failure_counts_reset_on_success() {
        let tally = Tally::default();
        let source = ScriptedSource::new([false, false, true, false], &tally, 0);
        let mut session = DeviceSession::new(spec("cam0"), source);

        assert!(!session.read_frame().ok());
        assert!(!session.read_frame().ok());
        assert_eq!(session.consecutive_failures(), 2);

        assert!(session.read_frame().ok());
        assert_eq!(session.consecutive_failures(), 0);

        assert!(!session.read_frame().ok());
        assert_eq!(session.consecutive_failures(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let tally = Tally::default();
        let mut session = DeviceSession::new(spec("cam0"), ScriptedSource::new([], &tally, 0));

        session.close();
        session.close();

        assert!(!session.is_open());
        assert_eq!(tally.closed.get(), 1);
    }

    #[test]
    fn test_read_after_close_yields_failed_sample() {
        let tally = Tally::default();
        let mut session = DeviceSession::new(spec("cam0"), ScriptedSource::new([], &tally, 0));
        session.close();

        assert!(!session.read_frame().ok());
        assert_eq!(tally.reads.get(), 0);
    }
}
