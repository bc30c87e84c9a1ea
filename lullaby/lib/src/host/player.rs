//! Pre-rendered narration through `mpv` or `ffplay`.
//!
//! Position is tracked by wall clock from the moment the player starts.
//! Pausing kills the player and remembers the offset; resuming starts a new
//! player seeked to that offset.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::{AUDIO_PLAYERS, ChildTask, find_program};
use crate::errors::EngineError;
use crate::traits::{AudioEngine, EventSink};
use crate::types::UnitId;

/// Arguments for playing `file` once from `offset`, without a window or
/// terminal output.
pub(crate) fn player_args(program: &str, file: &Path, offset: Duration) -> Vec<String> {
    let seconds = format!("{:.3}", offset.as_secs_f64());
    let mut args: Vec<String> = match program {
        "ffplay" => vec![
            "-nodisp".into(),
            "-autoexit".into(),
            "-loglevel".into(),
            "quiet".into(),
        ],
        _ => vec![
            "--no-video".into(),
            "--no-terminal".into(),
            "--really-quiet".into(),
        ],
    };
    if !offset.is_zero() {
        match program {
            "ffplay" => {
                args.push("-ss".into());
                args.push(seconds);
            }
            _ => args.push(format!("--start={seconds}")),
        }
    }
    args.push(file.to_string_lossy().into_owned());
    args
}

#[derive(Debug)]
struct Loaded {
    file: PathBuf,
    unit: UnitId,
}

/// [`AudioEngine`] backed by a host media player.
#[derive(Debug)]
pub struct HostAudioEngine {
    program: &'static str,
    sink: EventSink,
    runtime: Handle,
    loaded: Option<Loaded>,
    offset: Duration,
    started_at: Option<Instant>,
    task: Option<ChildTask>,
}

impl HostAudioEngine {
    /// Use the first installed player from [`AUDIO_PLAYERS`].
    pub fn detect(sink: EventSink, runtime: Handle) -> Result<Self, EngineError> {
        let program = find_program(&AUDIO_PLAYERS).ok_or(EngineError::Unavailable {
            kind: "audio player",
        })?;
        debug!(program, "Using host audio player");
        Ok(Self::with_program(program, sink, runtime))
    }

    /// Use a specific player binary.
    pub fn with_program(program: &'static str, sink: EventSink, runtime: Handle) -> Self {
        Self {
            program,
            sink,
            runtime,
            loaded: None,
            offset: Duration::ZERO,
            started_at: None,
            task: None,
        }
    }

    /// Spawn the player at the current offset.
    fn start(&mut self) -> Result<(), EngineError> {
        let Some(loaded) = self.loaded.as_ref() else {
            return Err(EngineError::NothingLoaded);
        };
        let mut command = Command::new(self.program);
        command
            .args(player_args(self.program, &loaded.file, self.offset))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = {
            let _guard = self.runtime.enter();
            command.spawn().map_err(|source| EngineError::Spawn {
                program: self.program.to_string(),
                source,
            })?
        };

        let unit = loaded.unit;
        let program = self.program;
        let sink = self.sink.clone();
        sink.unit_started(unit);
        self.started_at = Some(Instant::now());
        self.task = Some(ChildTask(self.runtime.spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => sink.unit_completed(unit),
                Ok(output) => {
                    let err = EngineError::ProcessFailed {
                        program: program.to_string(),
                        status: output.status.code(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    };
                    sink.unit_failed(unit, err.to_string());
                }
                Err(e) => sink.unit_failed(unit, e.to_string()),
            }
        })));
        trace!(program, offset_ms = self.offset.as_millis() as u64, "Player started");
        Ok(())
    }
}

impl AudioEngine for HostAudioEngine {
    fn play(&mut self, file: &Path, unit: UnitId) -> Result<(), EngineError> {
        self.stop();
        if !file.is_file() {
            return Err(EngineError::MissingResource {
                path: file.to_path_buf(),
            });
        }
        self.loaded = Some(Loaded {
            file: file.to_path_buf(),
            unit,
        });
        if let Err(e) = self.start() {
            self.loaded = None;
            return Err(e);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.task.take().is_some() {
            self.offset = self.position();
            self.started_at = None;
        }
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        if self.task.is_some() {
            return Ok(());
        }
        self.start()
    }

    fn stop(&mut self) {
        self.task = None;
        self.loaded = None;
        self.offset = Duration::ZERO;
        self.started_at = None;
    }

    fn position(&self) -> Duration {
        match self.started_at {
            Some(started) => self.offset + started.elapsed(),
            None => self.offset,
        }
    }
}
