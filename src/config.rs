//! Settings file handling.
//!
//! The settings file is the YAML document the calibration tooling already
//! keeps at `<data-root>/calibration_setting.yaml`. Only the keys below are
//! read; anything else in the file is ignored.

use crate::capture::DeviceSpec;
use crate::store::CaptureMode;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SETTINGS_FILE_NAME: &str = "calibration_setting.yaml";

/// A device may be given as an index (`0`) or a path (`/dev/video2`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    Index(u32),
    Path(String),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Index(index) => write!(f, "{index}"),
            DeviceRef::Path(path) => f.write_str(path),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub single_camera_path: Option<DeviceRef>,
    #[serde(default)]
    pub camera0_path: Option<DeviceRef>,
    #[serde(default)]
    pub camera1_path: Option<DeviceRef>,
    #[serde(default)]
    pub frame_width: Option<u32>,
    #[serde(default)]
    pub frame_height: Option<u32>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings file {} not found", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing required setting '{0}'")]
    MissingKey(&'static str),

    #[error("setting '{0}' must be greater than zero")]
    Zero(&'static str),
}

impl SettingsFile {
    /// Load `path`. A missing file is an error only when `required` is set;
    /// otherwise every key is left unset for the command line to fill in.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        if !path.exists() {
            if required {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            tracing::debug!("no settings file at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes as unit, not as a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }
}

/// Everything the capture core needs to open its devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub devices: Vec<String>,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub devices: Vec<String>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
}

impl Configuration {
    pub fn resolve(
        mode: CaptureMode,
        file: &SettingsFile,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let from_file: Vec<(&'static str, Option<&DeviceRef>)> = match mode {
            CaptureMode::Single => vec![("single_camera_path", file.single_camera_path.as_ref())],
            CaptureMode::Synched => vec![
                ("camera0_path", file.camera0_path.as_ref()),
                ("camera1_path", file.camera1_path.as_ref()),
            ],
        };

        let devices = from_file
            .into_iter()
            .enumerate()
            .map(|(i, (key, value))| match overrides.devices.get(i) {
                Some(device) => Ok(device.clone()),
                None => value
                    .map(DeviceRef::to_string)
                    .ok_or(ConfigError::MissingKey(key)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let frame_width = overrides
            .frame_width
            .or(file.frame_width)
            .ok_or(ConfigError::MissingKey("frame_width"))?;
        let frame_height = overrides
            .frame_height
            .or(file.frame_height)
            .ok_or(ConfigError::MissingKey("frame_height"))?;
        if frame_width == 0 {
            return Err(ConfigError::Zero("frame_width"));
        }
        if frame_height == 0 {
            return Err(ConfigError::Zero("frame_height"));
        }

        Ok(Self {
            devices,
            frame_width,
            frame_height,
        })
    }

    /// One spec per device, labelled `cam0`, `cam1`, ...
    pub fn device_specs(&self) -> Vec<DeviceSpec> {
        self.devices
            .iter()
            .enumerate()
            .map(|(i, device)| DeviceSpec {
                label: format!("cam{i}"),
                device: device.clone(),
                width: self.frame_width,
                height: self.frame_height,
            })
            .collect()
    }
}
