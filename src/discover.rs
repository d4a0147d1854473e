use anyhow::{Context, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};

/// Which udev symlink directory to list cameras from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Category {
    /// Stable per USB port: `/dev/v4l/by-path`
    #[default]
    ByPath,
    /// Stable per device serial: `/dev/v4l/by-id`
    ById,
}

impl Category {
    pub fn root(self) -> &'static Path {
        match self {
            Category::ByPath => Path::new("/dev/v4l/by-path"),
            Category::ById => Path::new("/dev/v4l/by-id"),
        }
    }
}

/// Capture nodes under `root`, sorted by name.
///
/// Every camera exposes a metadata node next to its capture node; only the
/// `index0` entry is the one that yields frames.
pub fn camera_paths(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Failed to list {}", root.display()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with("index0"))
        })
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    Ok(paths)
}

pub fn discover(category: Category) -> Result<Vec<PathBuf>> {
    let paths = camera_paths(category.root())?;
    tracing::debug!("found {} camera(s) under {}", paths.len(), category.root().display());
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_only_index0_entries_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "pci-0000:00:14.0-usb-0:2:1.0-video-index0",
            "pci-0000:00:14.0-usb-0:2:1.0-video-index1",
            "pci-0000:00:14.0-usb-0:1:1.0-video-index0",
            "pci-0000:00:14.0-usb-0:1:1.0-video-index1",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let found = camera_paths(dir.path()).unwrap();

        assert_eq!(
            found,
            vec![
                dir.path().join("pci-0000:00:14.0-usb-0:1:1.0-video-index0"),
                dir.path().join("pci-0000:00:14.0-usb-0:2:1.0-video-index0"),
            ]
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(camera_paths(&dir.path().join("v4l")).is_err());
    }
}
