//! Snapshot directory and file naming for committed frames.

use crate::error::{CaptureError, Result};
use clap::ValueEnum;
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Which snapshot layout a run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// One device, files named `img<NN>.<ext>`
    Single,
    /// Two devices, files named `img_<label>_<NN>.<ext>`
    Synched,
}

impl CaptureMode {
    /// Directory under the data root that holds this mode's snapshots
    pub fn subdirectory(self) -> &'static str {
        match self {
            CaptureMode::Single => "images/single_camera",
            CaptureMode::Synched => "images/synched",
        }
    }

    pub fn device_count(self) -> usize {
        match self {
            CaptureMode::Single => 1,
            CaptureMode::Synched => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SnapshotFormat {
    #[default]
    Png,
    Jpg,
    Bmp,
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Png => "png",
            SnapshotFormat::Jpg => "jpg",
            SnapshotFormat::Bmp => "bmp",
        }
    }

    fn image_format(self) -> image::ImageFormat {
        match self {
            SnapshotFormat::Png => image::ImageFormat::Png,
            SnapshotFormat::Jpg => image::ImageFormat::Jpeg,
            SnapshotFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

/// Writes committed frames into one snapshot directory.
#[derive(Debug)]
pub struct FrameStore {
    dir: PathBuf,
    mode: CaptureMode,
    format: SnapshotFormat,
}

impl FrameStore {
    /// Create `dir` (and parents) if needed. An existing directory is reused
    /// as-is, including any files a previous run left behind.
    pub fn ensure_directory(
        dir: impl Into<PathBuf>,
        mode: CaptureMode,
        format: SnapshotFormat,
    ) -> Result<Self> {
        let dir = dir.into();

        let created = if dir.exists() && !dir.is_dir() {
            Err("exists and is not a directory".to_string())
        } else {
            fs::create_dir_all(&dir).map_err(|e| e.to_string())
        };

        if let Err(reason) = created {
            let err = CaptureError::StorageUnavailable { path: dir, reason };
            tracing::error!("{}", err);
            return Err(err);
        }

        Ok(Self { dir, mode, format })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// File name for `label`'s frame of commit `sequence`. Single mode ignores the label.
    pub fn file_name(&self, label: &str, sequence: u64) -> String {
        let ext = self.format.extension();
        match self.mode {
            CaptureMode::Single => format!("img{sequence:02}.{ext}"),
            CaptureMode::Synched => format!("img_{label}_{sequence:02}.{ext}"),
        }
    }

    /// Inverse of [`FrameStore::file_name`]: the label and sequence a name encodes.
    pub fn parse_file_name(&self, name: &str) -> Option<(Option<String>, u64)> {
        let stem = name
            .strip_suffix(self.format.extension())?
            .strip_suffix('.')?;

        let (label, digits) = match self.mode {
            CaptureMode::Single => (None, stem.strip_prefix("img")?),
            CaptureMode::Synched => {
                let rest = stem.strip_prefix("img_")?;
                let (label, digits) = rest.rsplit_once('_')?;
                if label.is_empty() {
                    return None;
                }
                (Some(label.to_string()), digits)
            }
        };

        if digits.len() < 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some((label, digits.parse().ok()?))
    }

    /// First sequence number not used by any snapshot already in the directory.
    pub fn next_free_sequence(&self) -> Result<u64> {
        let entries = fs::read_dir(&self.dir).map_err(|e| CaptureError::StorageUnavailable {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;

        let next = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| self.parse_file_name(&name))
            .filter_map(|(_, sequence)| {
                let next = sequence.checked_add(1);
                if next.is_none() {
                    tracing::warn!("ignoring snapshot #{} when picking the next number", sequence);
                }
                next
            })
            .max()
            .unwrap_or(0);

        Ok(next)
    }

    /// Write every frame of one commit under `sequence`, in the order given.
    ///
    /// Stops at the first failed write. Files written before it are left in
    /// place and reported in the error.
    pub fn commit(&self, sequence: u64, frames: &[(&str, &RgbImage)]) -> Result<Vec<PathBuf>> {
        let _span = tracing::debug_span!("commit", sequence).entered();
        let started = Instant::now();
        let mut written = Vec::with_capacity(frames.len());

        for (label, frame) in frames {
            let path = self.dir.join(self.file_name(label, sequence));
            if path.exists() {
                tracing::warn!("overwriting existing snapshot {}", path.display());
            }

            if let Err(source) = frame.save_with_format(&path, self.format.image_format()) {
                return Err(CaptureError::PartialCommit {
                    sequence,
                    written,
                    failed: path,
                    source,
                });
            }
            written.push(path);
        }

        tracing::debug!(
            "commit {} took {:.1}ms",
            sequence,
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::capture_logs;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(4, 2, image::Rgb([7, 8, 9]))
    }

    #[test]
    fn test_single_names_have_no_label() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Single, SnapshotFormat::Png)
                .unwrap();

        assert_eq!(store.file_name("cam0", 0), "img00.png");
        assert_eq!(store.file_name("cam0", 7), "img07.png");
        assert_eq!(store.file_name("cam0", 123), "img123.png");
    }

    #[test]
    fn test_synched_names_carry_label() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Synched, SnapshotFormat::Jpg)
                .unwrap();

        assert_eq!(store.file_name("cam0", 0), "img_cam0_00.jpg");
        assert_eq!(store.file_name("cam1", 42), "img_cam1_42.jpg");
    }

    #[test]
    fn test_names_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let single =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Single, SnapshotFormat::Png)
                .unwrap();
        let synched =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Synched, SnapshotFormat::Png)
                .unwrap();

        for sequence in [0, 9, 10, 99, 100, 4096] {
            let name = single.file_name("cam0", sequence);
            assert_eq!(name, single.file_name("cam0", sequence));
            assert_eq!(single.parse_file_name(&name), Some((None, sequence)));

            for label in ["cam0", "cam1"] {
                let name = synched.file_name(label, sequence);
                assert_eq!(
                    synched.parse_file_name(&name),
                    Some((Some(label.to_string()), sequence))
                );
            }
        }
    }

    #[test]
    fn test_foreign_names_do_not_parse() {
        let dir = tempfile::tempdir().unwrap();
        let single =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Single, SnapshotFormat::Png)
                .unwrap();

        assert_eq!(single.parse_file_name("img_cam0_00.png"), None);
        assert_eq!(single.parse_file_name("img0.png"), None);
        assert_eq!(single.parse_file_name("img00.jpg"), None);
        assert_eq!(single.parse_file_name("notes.txt"), None);
    }

    #[test]
    fn test_ensure_creates_nested_and_reuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("data/images/synched");

        FrameStore::ensure_directory(&nested, CaptureMode::Synched, SnapshotFormat::Png).unwrap();
        fs::write(nested.join("keep.txt"), b"x").unwrap();
        FrameStore::ensure_directory(&nested, CaptureMode::Synched, SnapshotFormat::Png).unwrap();

        assert!(nested.join("keep.txt").exists());
    }

    #[test]
    fn test_ensure_rejects_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("images");
        fs::write(&blocker, b"x").unwrap();

        let err = FrameStore::ensure_directory(&blocker, CaptureMode::Single, SnapshotFormat::Png)
            .unwrap_err();
        assert!(matches!(err, CaptureError::StorageUnavailable { .. }));

        let err = FrameStore::ensure_directory(
            blocker.join("single_camera"),
            CaptureMode::Single,
            SnapshotFormat::Png,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::StorageUnavailable { .. }));
    }

    #[test]
    fn test_commit_writes_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Synched, SnapshotFormat::Png)
                .unwrap();
        let (a, b) = (frame(), frame());

        let written = store.commit(3, &[("cam0", &a), ("cam1", &b)]).unwrap();

        assert_eq!(
            written,
            vec![
                dir.path().join("img_cam0_03.png"),
                dir.path().join("img_cam1_03.png")
            ]
        );
        let reloaded = image::open(&written[0]).unwrap().to_rgb8();
        assert_eq!(reloaded, a);
    }

    #[test]
    fn test_partial_commit_keeps_earlier_file() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Synched, SnapshotFormat::Png)
                .unwrap();
        // A directory where the second file should go makes that write fail
        fs::create_dir(dir.path().join("img_cam1_00.png")).unwrap();
        let (a, b) = (frame(), frame());

        let err = store.commit(0, &[("cam0", &a), ("cam1", &b)]).unwrap_err();

        match err {
            CaptureError::PartialCommit {
                sequence,
                written,
                failed,
                ..
            } => {
                assert_eq!(sequence, 0);
                assert_eq!(written, vec![dir.path().join("img_cam0_00.png")]);
                assert_eq!(failed, dir.path().join("img_cam1_00.png"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(dir.path().join("img_cam0_00.png").is_file());
    }

    #[test]
    fn test_storage_failure_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("images");
        fs::write(&blocker, b"x").unwrap();

        let (result, logs) = capture_logs(|| {
            FrameStore::ensure_directory(&blocker, CaptureMode::Single, SnapshotFormat::Png)
        });

        assert!(result.is_err());
        assert!(logs.contains("ERROR"), "{logs}");
        assert!(logs.contains("not a directory"), "{logs}");
    }

    #[test]
    fn test_next_free_sequence_skips_last_possible_number() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Single, SnapshotFormat::Png)
                .unwrap();
        fs::write(dir.path().join(format!("img{}.png", u64::MAX)), b"").unwrap();
        assert_eq!(store.next_free_sequence().unwrap(), 0);

        fs::write(dir.path().join("img06.png"), b"").unwrap();
        assert_eq!(store.next_free_sequence().unwrap(), 7);
    }

    #[test]
    fn test_next_free_sequence_scans_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FrameStore::ensure_directory(dir.path(), CaptureMode::Single, SnapshotFormat::Png)
                .unwrap();
        assert_eq!(store.next_free_sequence().unwrap(), 0);

        let f = frame();
        store.commit(0, &[("cam0", &f)]).unwrap();
        store.commit(4, &[("cam0", &f)]).unwrap();
        fs::write(dir.path().join("img_cam0_99.png"), b"").unwrap();

        assert_eq!(store.next_free_sequence().unwrap(), 5);
    }
}
