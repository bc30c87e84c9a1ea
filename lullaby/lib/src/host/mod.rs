//! Adapters for the speech and audio programs installed on the host.
//!
//! Each adapter runs a command-line program per unit (`say`/`espeak-ng`
//! for sentences, `mpv`/`ffplay` for files) under a tokio task and reports
//! start, completion and failure through an [`EventSink`]. Stopping aborts
//! the task, which kills the child process.

mod ambience;
mod player;
mod scheduler;
mod speech;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

pub use ambience::HostAmbiencePlayer;
pub use player::HostAudioEngine;
pub use scheduler::TokioScheduler;
pub use speech::{HostSpeechEngine, SpeechProgram};

use crate::errors::EngineError;
use crate::resolve::AssetResolver;
use crate::session::Platform;
use crate::traits::{AmbiencePlayer, AudioEngine, EventSink, SpeechEngine};
use crate::types::{AmbienceTrack, UnitId, Utterance};

/// Audio players able to start at an offset, in preference order.
pub const AUDIO_PLAYERS: [&str; 2] = ["mpv", "ffplay"];

/// Return the first of `candidates` found on `PATH`.
pub fn find_program(candidates: &[&'static str]) -> Option<&'static str> {
    candidates
        .iter()
        .copied()
        .find(|program| which::which(program).is_ok())
}

/// Build a [`Platform`] from whatever the host has installed.
///
/// Missing programs are replaced by [`Unavailable`], so a host without a
/// player still narrates with speech and a host without anything reports a
/// clear error on `play()`.
pub fn host_platform(sink: EventSink, assets: AssetResolver, runtime: Handle) -> Platform {
    let speech: Box<dyn SpeechEngine> = match HostSpeechEngine::detect(sink.clone(), runtime.clone()) {
        Ok(engine) => Box::new(engine),
        Err(e) => {
            warn!(error = %e, "Speech synthesis unavailable");
            Box::new(Unavailable::new("speech"))
        }
    };

    let audio: Box<dyn AudioEngine> =
        match HostAudioEngine::detect(sink.clone(), runtime.clone()) {
            Ok(engine) => Box::new(engine),
            Err(e) => {
                warn!(error = %e, "Pre-rendered playback unavailable");
                Box::new(Unavailable::new("audio player"))
            }
        };

    let ambience: Box<dyn AmbiencePlayer> =
        match HostAmbiencePlayer::detect(assets, runtime.clone()) {
            Ok(player) => Box::new(player),
            Err(e) => {
                warn!(error = %e, "Ambience playback unavailable");
                Box::new(Unavailable::new("audio player"))
            }
        };

    Platform {
        speech,
        audio,
        ambience,
        scheduler: Arc::new(TokioScheduler::new(sink, runtime)),
    }
}

/// Stand-in for an engine whose program is not installed.
///
/// Every start request fails with [`EngineError::Unavailable`]; transport
/// commands are ignored.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable {
    kind: &'static str,
}

impl Unavailable {
    /// An engine of the given kind (`speech`, `audio player`).
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }

    fn error(&self) -> EngineError {
        EngineError::Unavailable { kind: self.kind }
    }
}

impl SpeechEngine for Unavailable {
    fn speak(&mut self, _utterance: Utterance) -> Result<(), EngineError> {
        Err(self.error())
    }
    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn stop(&mut self) {}
}

impl AudioEngine for Unavailable {
    fn play(&mut self, _file: &Path, _unit: UnitId) -> Result<(), EngineError> {
        Err(self.error())
    }
    fn pause(&mut self) {}
    fn resume(&mut self) -> Result<(), EngineError> {
        Err(self.error())
    }
    fn stop(&mut self) {}
    fn position(&self) -> Duration {
        Duration::ZERO
    }
}

impl AmbiencePlayer for Unavailable {
    fn load(&mut self, _track: AmbienceTrack) -> Result<(), EngineError> {
        Err(self.error())
    }
    fn play_looping(&mut self, _volume: f32) -> Result<(), EngineError> {
        Err(self.error())
    }
    fn pause(&mut self) {}
    fn resume(&mut self) {}
    fn set_volume(&mut self, _volume: f32) {}
    fn stop(&mut self) {}
}

/// A task supervising one child process. Aborted on drop.
#[derive(Debug)]
struct ChildTask(JoinHandle<()>);

impl Drop for ChildTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Volume in `[0, 1]` as the `0..=100` integer most players take.
fn percent(volume: f32) -> u32 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u32
}
