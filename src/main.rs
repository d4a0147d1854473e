mod capture;
mod capture_loop;
mod config;
mod discover;
mod error;
mod keyboard;
mod output;
mod store;

use anyhow::{Context, Result};
use capture::WebcamCapture;
use capture_loop::{start_session, CaptureLoop, LoopSettings};
use clap::{Parser, Subcommand};
use config::{Configuration, Overrides, SettingsFile, SETTINGS_FILE_NAME};
use discover::Category;
use keyboard::TerminalCommands;
use output::{HeadlessPreview, LoopbackPreview, PreviewSurface};
use std::path::PathBuf;
use std::time::Duration;
use store::{CaptureMode, FrameStore, SnapshotFormat};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Save frames from one camera into images/single_camera
    Single(CaptureArgs),
    /// Save matched frame pairs from two cameras into images/synched
    Stereo(CaptureArgs),
    /// List connected cameras
    Discover {
        #[arg(long, value_enum, default_value_t)]
        category: Category,
    },
}

#[derive(clap::Args, Debug)]
struct CaptureArgs {
    /// Data root holding the settings file and the images directory
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Settings file (defaults to <data-dir>/calibration_setting.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device index or path; repeat for camera 1
    #[arg(short, long = "device")]
    devices: Vec<String>,

    /// Fill in devices missing from the settings with discovered cameras
    #[arg(long)]
    auto_detect: bool,

    /// Where --auto-detect looks for cameras
    #[arg(long, value_enum, default_value_t)]
    category: Category,

    /// Requested frame width
    #[arg(long)]
    width: Option<u32>,

    /// Requested frame height
    #[arg(long)]
    height: Option<u32>,

    /// v4l2loopback device to preview on; repeat for camera 1.
    /// Without it previews are headless.
    #[arg(long = "preview")]
    previews: Vec<PathBuf>,

    /// Snapshot image format
    #[arg(long, value_enum, default_value_t)]
    format: SnapshotFormat,

    /// First sequence number to write
    #[arg(long, conflicts_with = "resume")]
    start_index: Option<u64>,

    /// Continue numbering after the snapshots already on disk
    #[arg(long)]
    resume: bool,

    /// Longest wait for a key press per tick, in milliseconds
    #[arg(long, default_value_t = 10)]
    poll_ms: u64,

    /// Consecutive failed reads before a camera is considered lost
    #[arg(long, default_value_t = 30)]
    max_read_failures: u32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(keyboard::log_writer)
        .init();

    match args.command {
        Commands::Single(capture) => run_capture(CaptureMode::Single, capture),
        Commands::Stereo(capture) => run_capture(CaptureMode::Synched, capture),
        Commands::Discover { category } => {
            let found = discover::discover(category).inspect_err(|e| tracing::error!("{:#}", e))?;
            for path in found {
                println!("{}", path.display());
            }
            Ok(())
        }
    }
}

fn run_capture(mode: CaptureMode, args: CaptureArgs) -> Result<()> {
    let config = load_configuration(mode, &args)?;
    tracing::info!(
        "Devices: {}; requested {}x{}",
        config.devices.join(", "),
        config.frame_width,
        config.frame_height
    );

    let store = FrameStore::ensure_directory(
        args.data_dir.join(mode.subdirectory()),
        mode,
        args.format,
    )?;
    let next_free = store
        .next_free_sequence()
        .inspect_err(|e| tracing::error!("{}", e))?;
    let start = if args.resume {
        next_free
    } else {
        args.start_index.unwrap_or(0)
    };
    if start < next_free {
        tracing::warn!(
            "{} already holds snapshots up to #{}; numbering from {} will overwrite them (use --resume to append)",
            store.dir().display(),
            next_free - 1,
            start
        );
    }

    let (session, previews) = start_session(
        &config.device_specs(),
        |spec| WebcamCapture::new(&spec.device, spec.width, spec.height),
        || open_previews(mode, &args, &config),
    )?;
    let mut session = session.starting_at(start);

    let commands = match TerminalCommands::enter() {
        Ok(commands) => commands,
        Err(e) => {
            session.close_all();
            let err = anyhow::Error::new(e).context("Failed to read keys from the terminal");
            tracing::error!("{:#}", err);
            return Err(err);
        }
    };

    let settings = LoopSettings {
        poll_timeout: Duration::from_millis(args.poll_ms),
        max_consecutive_failures: args.max_read_failures,
    };
    let summary = CaptureLoop::new(&mut session, previews, commands, &store, settings).run()?;

    tracing::info!(
        "{} commit(s) in {:?} mode; next sequence {}",
        summary.commits,
        store.mode(),
        session.sequence()
    );
    Ok(())
}

fn load_configuration(mode: CaptureMode, args: &CaptureArgs) -> Result<Configuration> {
    read_configuration(mode, args).inspect_err(|e| tracing::error!("{:#}", e))
}

fn read_configuration(mode: CaptureMode, args: &CaptureArgs) -> Result<Configuration> {
    let (path, required) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (args.data_dir.join(SETTINGS_FILE_NAME), false),
    };
    let file = SettingsFile::load(&path, required)?;

    let mut overrides = Overrides {
        devices: args.devices.clone(),
        frame_width: args.width,
        frame_height: args.height,
    };

    let wanted = mode.device_count();
    let given = overrides.devices.len();
    if args.auto_detect && given < wanted {
        let found = discover::discover(args.category).context("Camera auto-detection failed")?;
        tracing::info!("Auto-detected {} camera(s)", found.len());
        // Explicit devices keep their slots; discovered ones fill the rest in order
        overrides.devices.extend(
            found
                .iter()
                .skip(given)
                .take(wanted - given)
                .map(|p| p.display().to_string()),
        );
    }

    Configuration::resolve(mode, &file, &overrides).context("Invalid configuration")
}

fn open_previews(
    mode: CaptureMode,
    args: &CaptureArgs,
    config: &Configuration,
) -> Result<Vec<Box<dyn PreviewSurface>>> {
    let names: Vec<String> = match mode {
        CaptureMode::Single => vec!["single camera".to_string()],
        CaptureMode::Synched => (0..config.devices.len()).map(|i| format!("camera {i}")).collect(),
    };

    let mut previews: Vec<Box<dyn PreviewSurface>> = Vec::with_capacity(names.len());
    for (i, name) in names.into_iter().enumerate() {
        match args.previews.get(i) {
            Some(path) => {
                let preview =
                    LoopbackPreview::new(name, path, config.frame_width, config.frame_height);
                match preview {
                    Ok(preview) => previews.push(Box::new(preview)),
                    Err(e) => {
                        for opened in &mut previews {
                            opened.close();
                        }
                        return Err(e);
                    }
                }
            }
            None => previews.push(Box::new(HeadlessPreview::new(name))),
        }
    }

    Ok(previews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testing::capture_logs;

    fn capture_args(argv: &[&str]) -> (CaptureMode, CaptureArgs) {
        let args = Args::try_parse_from(argv).unwrap();
        match args.command {
            Commands::Single(capture) => (CaptureMode::Single, capture),
            Commands::Stereo(capture) => (CaptureMode::Synched, capture),
            Commands::Discover { .. } => panic!("not a capture command"),
        }
    }

    #[test]
    fn test_missing_settings_file_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nowhere.yaml");
        let (mode, args) = capture_args(&[
            "calib-grab",
            "stereo",
            "--config",
            missing.to_str().unwrap(),
        ]);

        let (result, logs) = capture_logs(|| load_configuration(mode, &args));

        assert!(result.is_err());
        assert!(logs.contains("ERROR"));
        assert!(logs.contains("nowhere.yaml"));
    }

    #[test]
    fn test_command_line_fills_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let (mode, args) = capture_args(&[
            "calib-grab",
            "single",
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--device",
            "/dev/video2",
            "--width",
            "640",
            "--height",
            "480",
        ]);

        let config = load_configuration(mode, &args).unwrap();

        assert_eq!(config.devices, vec!["/dev/video2".to_string()]);
        assert_eq!((config.frame_width, config.frame_height), (640, 480));
    }

    #[test]
    fn test_incomplete_configuration_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let (mode, args) = capture_args(&[
            "calib-grab",
            "single",
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--device",
            "0",
        ]);

        let (result, logs) = capture_logs(|| load_configuration(mode, &args));

        assert!(result.is_err());
        assert!(logs.contains("frame_width"));
    }
}
