//! Seams between the narration controller and the platform.
//!
//! The controller never talks to a speech synthesizer or audio device
//! directly. It drives these traits, and the adapter behind each one
//! reports asynchronous completion back as an [`EngineEvent`] through an
//! [`EventSink`]. The adapter is the only piece with platform bindings.
//!
//! ## Examples
//!
//! ```
//! use lullaby::{EngineError, SpeechEngine, Utterance};
//!
//! /// Prints sentences instead of speaking them.
//! struct Teleprompter;
//!
//! impl SpeechEngine for Teleprompter {
//!     fn speak(&mut self, utterance: Utterance) -> Result<(), EngineError> {
//!         println!("{}", utterance.text);
//!         Ok(())
//!     }
//!     fn pause(&mut self) {}
//!     fn resume(&mut self) {}
//!     fn stop(&mut self) {}
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::TimerId;
use crate::errors::EngineError;
use crate::types::{AmbienceTrack, UnitId, Utterance};

/// Speaks one sentence at a time.
///
/// `speak` returns as soon as the utterance is queued. The adapter reports
/// [`EngineEvent::UnitStarted`] when audio begins and
/// [`EngineEvent::UnitCompleted`] when it (and its trailing pause) ends.
pub trait SpeechEngine: Send {
    /// Queue a sentence, replacing anything still speaking.
    fn speak(&mut self, utterance: Utterance) -> Result<(), EngineError>;

    /// Pause the current sentence.
    fn pause(&mut self);

    /// Continue a paused sentence.
    fn resume(&mut self);

    /// Stop speaking and forget the current sentence. Must not report
    /// completion for it afterwards.
    fn stop(&mut self);
}

/// Transport controls for a pre-rendered narration file.
pub trait AudioEngine: Send {
    /// Start playing `file` from the beginning.
    fn play(&mut self, file: &Path, unit: UnitId) -> Result<(), EngineError>;

    /// Pause playback, keeping the position.
    fn pause(&mut self);

    /// Continue from the paused position.
    fn resume(&mut self) -> Result<(), EngineError>;

    /// Stop playback and release the file. Must not report completion
    /// afterwards.
    fn stop(&mut self);

    /// Current playback position.
    fn position(&self) -> Duration;
}

/// A single looping background track.
pub trait AmbiencePlayer: Send {
    /// Decode `track` so that a later [`play_looping`](Self::play_looping)
    /// starts without delay.
    fn load(&mut self, track: AmbienceTrack) -> Result<(), EngineError>;

    /// Start the loaded track looping forever at `volume`.
    fn play_looping(&mut self, volume: f32) -> Result<(), EngineError>;

    /// Pause the loop.
    fn pause(&mut self);

    /// Continue the loop.
    fn resume(&mut self);

    /// Change output volume (`0.0..=1.0`) immediately.
    fn set_volume(&mut self, volume: f32);

    /// Whether [`set_volume`](Self::set_volume) reaches a track that is
    /// already playing. Players that only take a volume at start return
    /// `false` and are never faded.
    fn supports_live_volume(&self) -> bool {
        true
    }

    /// Halt and release the track.
    fn stop(&mut self);
}

/// Callbacks delivered to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A unit started producing audio.
    UnitStarted(UnitId),
    /// A unit finished.
    UnitCompleted(UnitId),
    /// A unit failed inside the engine.
    UnitFailed {
        /// The failed unit.
        unit: UnitId,
        /// Engine-supplied description.
        message: String,
    },
    /// A repeating timer fired.
    Timer(TimerId),
}

/// Where adapters send [`EngineEvent`]s.
///
/// Sends never block. A closed sink means the session is gone and the
/// event is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSink {
    /// Wrap a channel sender.
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver it feeds.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Send any event.
    pub fn send(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Report that `unit` started.
    pub fn unit_started(&self, unit: UnitId) {
        self.send(EngineEvent::UnitStarted(unit));
    }

    /// Report that `unit` completed.
    pub fn unit_completed(&self, unit: UnitId) {
        self.send(EngineEvent::UnitCompleted(unit));
    }

    /// Report that `unit` failed.
    pub fn unit_failed(&self, unit: UnitId, message: impl Into<String>) {
        self.send(EngineEvent::UnitFailed {
            unit,
            message: message.into(),
        });
    }

    /// Report that `timer` fired.
    pub fn timer_fired(&self, timer: TimerId) {
        self.send(EngineEvent::Timer(timer));
    }
}
