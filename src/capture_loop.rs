//! Lock-step capture of one or two devices.
//!
//! Every tick reads device 0, then device 1, and only afterwards polls the
//! operator. A save therefore always pairs frames read back to back in the
//! same tick: skew is bounded by two sequential reads, not by input latency.
//! There is no hardware synchronization; the pairing is best effort.

use crate::capture::{CaptureSource, DeviceSession, DeviceSpec, FrameSample};
use crate::error::{CaptureError, Result};
use crate::output::PreviewSurface;
use crate::store::FrameStore;
use image::RgbImage;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// What the operator can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Save,
    Quit,
}

/// Where operator commands come from.
pub trait CommandSource {
    /// Wait at most `timeout` for the next command.
    fn poll(&mut self, timeout: Duration) -> io::Result<Option<Command>>;
}

/// Open devices plus the sequence number the next commit will use.
pub struct CaptureSession<S> {
    devices: Vec<DeviceSession<S>>,
    sequence: u64,
}

impl<S: CaptureSource> CaptureSession<S> {
    /// Open every device in order. If one fails, the ones already open are
    /// closed again before the error is returned.
    pub fn open<F>(specs: &[DeviceSpec], mut opener: F) -> Result<Self>
    where
        F: FnMut(&DeviceSpec) -> anyhow::Result<S>,
    {
        let mut devices: Vec<DeviceSession<S>> = Vec::with_capacity(specs.len());

        for spec in specs {
            match opener(spec) {
                Ok(source) => devices.push(DeviceSession::new(spec.clone(), source)),
                Err(e) => {
                    for device in &mut devices {
                        device.close();
                    }
                    return Err(CaptureError::DeviceUnavailable {
                        label: spec.label.clone(),
                        device: spec.device.clone(),
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        Ok(Self {
            devices,
            sequence: 0,
        })
    }

    /// Start numbering at `sequence` instead of 0.
    pub fn starting_at(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn close_all(&mut self) {
        for device in self.devices.iter_mut().filter(|d| d.is_open()) {
            device.close();
        }
    }
}

/// Open every device, then the previews.
///
/// Previews are only created once every device is open, so a device that
/// cannot be opened aborts the session before anything is shown. Whatever
/// was opened is released again on failure, and the failure is logged.
pub fn start_session<S, F, P>(
    specs: &[DeviceSpec],
    opener: F,
    open_previews: P,
) -> Result<(CaptureSession<S>, Vec<Box<dyn PreviewSurface>>)>
where
    S: CaptureSource,
    F: FnMut(&DeviceSpec) -> anyhow::Result<S>,
    P: FnOnce() -> anyhow::Result<Vec<Box<dyn PreviewSurface>>>,
{
    let mut session =
        CaptureSession::open(specs, opener).inspect_err(|e| tracing::error!("{}", e))?;

    match open_previews() {
        Ok(previews) => Ok((session, previews)),
        Err(e) => {
            session.close_all();
            let err = CaptureError::PreviewUnavailable {
                reason: format!("{e:#}"),
            };
            tracing::error!("{}", err);
            Err(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug)]
enum StopReason {
    Quit,
    DeviceFault { label: String, failures: u32 },
    Input(io::Error),
    SequenceExhausted(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Upper bound on how long a tick waits for operator input
    pub poll_timeout: Duration,
    /// Consecutive failed reads after which a device is considered gone
    pub max_consecutive_failures: u32,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            max_consecutive_failures: 30,
        }
    }
}

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Read outcome per device, in device order
    pub reads: Vec<bool>,
    pub command: Option<Command>,
    /// Files written by this tick's commit, if it succeeded
    pub committed: Option<Vec<PathBuf>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub commits: u64,
    /// Saves requested on a tick where some device had no frame
    pub dropped_saves: u64,
}

pub struct CaptureLoop<'a, S, C> {
    session: &'a mut CaptureSession<S>,
    previews: Vec<Box<dyn PreviewSurface>>,
    preview_failures: Vec<u64>,
    commands: C,
    store: &'a FrameStore,
    settings: LoopSettings,
    state: LoopState,
    stop_reason: Option<StopReason>,
    ticks: u64,
}

impl<'a, S, C> CaptureLoop<'a, S, C>
where
    S: CaptureSource,
    C: CommandSource,
{
    /// `previews[i]` shows device `i`.
    pub fn new(
        session: &'a mut CaptureSession<S>,
        previews: Vec<Box<dyn PreviewSurface>>,
        commands: C,
        store: &'a FrameStore,
        settings: LoopSettings,
    ) -> Self {
        let preview_failures = vec![0; previews.len()];
        Self {
            session,
            previews,
            preview_failures,
            commands,
            store,
            settings,
            state: LoopState::Running,
            stop_reason: None,
            ticks: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Tick until stopped, then release every device and preview.
    pub fn run(mut self) -> Result<RunSummary> {
        tracing::info!(
            "Capturing from {} device(s) into {}; press 's' to save, Esc to quit",
            self.session.devices.len(),
            self.store.dir().display()
        );

        let mut commits = 0;
        let mut dropped_saves = 0;
        while self.state() == LoopState::Running {
            let report = self.tick();
            if report.committed.is_some() {
                commits += 1;
            } else if report.command == Some(Command::Save) && report.reads.contains(&false) {
                dropped_saves += 1;
            }
        }
        self.shutdown();

        let summary = RunSummary {
            ticks: self.ticks,
            commits,
            dropped_saves,
        };

        match self.stop_reason.take() {
            Some(StopReason::DeviceFault { label, failures }) => {
                Err(CaptureError::TerminalReadFailure { label, failures })
            }
            Some(StopReason::Input(e)) => Err(CaptureError::Input(e)),
            Some(StopReason::SequenceExhausted(sequence)) => {
                Err(CaptureError::SequenceExhausted { sequence })
            }
            Some(StopReason::Quit) | None => {
                tracing::info!(
                    "Stopped after {} ticks, {} commit(s), {} save(s) dropped for missing frames",
                    summary.ticks,
                    summary.commits,
                    summary.dropped_saves
                );
                Ok(summary)
            }
        }
    }

    /// One read, preview, poll, commit cycle. Does nothing unless running.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.state != LoopState::Running {
            return report;
        }

        let _span = tracing::debug_span!("tick", n = self.ticks).entered();
        self.ticks += 1;

        // Back to back, before anything that can wait on the operator
        let samples: Vec<FrameSample> = self
            .session
            .devices
            .iter_mut()
            .map(DeviceSession::read_frame)
            .collect();
        report.reads = samples.iter().map(FrameSample::ok).collect();

        self.render(&samples);

        let limit = self.settings.max_consecutive_failures.max(1);
        if let Some(device) = self
            .session
            .devices
            .iter()
            .find(|d| d.consecutive_failures() >= limit)
        {
            tracing::error!(
                "{} produced no frame for {} consecutive reads, stopping session",
                device.label(),
                device.consecutive_failures()
            );
            self.stop_reason = Some(StopReason::DeviceFault {
                label: device.label().to_string(),
                failures: device.consecutive_failures(),
            });
            self.state = LoopState::Stopping;
            return report;
        }

        let command = match self.commands.poll(self.settings.poll_timeout) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!("operator input failed, stopping session: {}", e);
                self.stop_reason = Some(StopReason::Input(e));
                self.state = LoopState::Stopping;
                return report;
            }
        };
        report.command = command;

        match command {
            Some(Command::Quit) => {
                self.stop_reason = Some(StopReason::Quit);
                self.state = LoopState::Stopping;
            }
            Some(Command::Save) => report.committed = self.commit(&samples),
            None => {}
        }

        report
    }

    fn render(&mut self, samples: &[FrameSample]) {
        for (index, sample) in samples.iter().enumerate() {
            let (Some(frame), Some(preview)) = (&sample.image, self.previews.get_mut(index))
            else {
                continue;
            };

            if let Err(e) = preview.show(frame) {
                self.preview_failures[index] += 1;
                if self.preview_failures[index] == 1 {
                    tracing::warn!("preview '{}' failed: {:#}", preview.name(), e);
                } else {
                    tracing::debug!("preview '{}' failed: {:#}", preview.name(), e);
                }
            }
        }
    }

    fn commit(&mut self, samples: &[FrameSample]) -> Option<Vec<PathBuf>> {
        if !samples.iter().all(FrameSample::ok) {
            tracing::debug!("save dropped: not every device produced a frame this tick");
            return None;
        }

        let frames: Vec<(&str, &RgbImage)> = self
            .session
            .devices
            .iter()
            .zip(samples)
            .filter_map(|(device, sample)| sample.image.as_ref().map(|img| (device.label(), img)))
            .collect();

        let sequence = self.session.sequence;
        let Some(next) = sequence.checked_add(1) else {
            let err = CaptureError::SequenceExhausted { sequence };
            tracing::error!("{}, stopping session", err);
            self.stop_reason = Some(StopReason::SequenceExhausted(sequence));
            self.state = LoopState::Stopping;
            return None;
        };

        match self.store.commit(sequence, &frames) {
            Ok(written) => {
                self.session.sequence = next;
                let names: Vec<String> = written
                    .iter()
                    .filter_map(|path| path.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
                    .collect();
                tracing::info!("{} saved.", names.join(" and "));
                Some(written)
            }
            Err(e) => {
                tracing::warn!("{}; sequence stays at {}", e, sequence);
                None
            }
        }
    }

    fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopping;

        self.session.close_all();
        for preview in &mut self.previews {
            preview.close();
        }

        self.state = LoopState::Stopped;
    }
}
