//! The narration session state machine.
//!
//! A [`NarrationSession`] owns one prepared [`NarrationSource`] and drives it
//! through `Idle → Preparing → Ready → Playing ⇄ Paused → Idle`. It is
//! synchronous and single-owner: every command and every engine callback is
//! a method call on the control task, so no state is shared across threads.
//!
//! ## Runs and epochs
//!
//! Each start from the beginning opens a new *run* with a fresh epoch.
//! Engine callbacks carry a [`UnitId`] with the epoch they were issued
//! under; anything from an older run, or for a unit other than the current
//! one, is ignored. Stopping, finishing, failing and re-preparing all close
//! the run.
//!
//! ## Ambience coupling
//!
//! Ambience starts on the first unit-start callback of a run (never on
//! `play()` itself), pauses and resumes with narration, fades out on natural
//! completion and is halted on every other path to `Idle`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::ambience::AmbienceCoordinator;
use crate::clock::{ProgressClock, Scheduler, TimerId};
use crate::config::{NarrationConfig, SpeechConfig};
use crate::errors::NarrationError;
use crate::preparer::synthesized_content;
use crate::traits::{AmbiencePlayer, AudioEngine, EngineEvent, SpeechEngine};
use crate::types::{
    Language, NarrationSource, PrepareRequest, PreparedContent, ProgressSnapshot,
    SessionSnapshot, SessionState, SourceKind, UnitId, Utterance,
};

/// The platform services a session drives.
///
/// Passed in at construction so nothing in the session reaches for global
/// state, and tests can hand in fakes.
pub struct Platform {
    /// Sentence-by-sentence speech synthesis.
    pub speech: Box<dyn SpeechEngine>,
    /// Pre-rendered narration playback.
    pub audio: Box<dyn AudioEngine>,
    /// Looping ambience playback.
    pub ambience: Box<dyn AmbiencePlayer>,
    /// Repeating timers for the progress clock and ambience fades.
    pub scheduler: Arc<dyn Scheduler>,
}

/// Identifies one call to [`NarrationSession::begin_preparation`].
///
/// Only the ticket of the latest preparation is accepted by
/// [`NarrationSession::complete_preparation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreparationTicket {
    generation: u64,
}

impl PreparationTicket {
    /// The preparation generation this ticket belongs to.
    pub fn generation(self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RunFlags {
    /// The first unit-start callback of this run has arrived.
    unit_started: bool,
    /// Ambience was started during this run.
    ambience_started: bool,
    /// A sentence completed while paused; the next one goes out on resume.
    dispatch_on_resume: bool,
}

enum Dispatch {
    Speak(Utterance),
    Play { file: PathBuf, unit: UnitId },
}

/// One narration lifecycle for one story and language.
pub struct NarrationSession {
    speech_config: SpeechConfig,
    speech: Box<dyn SpeechEngine>,
    audio: Box<dyn AudioEngine>,
    ambience: AmbienceCoordinator,
    clock: ProgressClock,
    state: SessionState,
    prepared: Option<PreparedContent>,
    request: Option<PrepareRequest>,
    generation: u64,
    epoch: u64,
    current_index: usize,
    run: RunFlags,
    error_message: Option<String>,
}

impl fmt::Debug for NarrationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NarrationSession")
            .field("state", &self.state)
            .field("prepared", &self.prepared)
            .field("generation", &self.generation)
            .field("epoch", &self.epoch)
            .field("current_index", &self.current_index)
            .field("clock", &self.clock)
            .field("ambience", &self.ambience)
            .field("error_message", &self.error_message)
            .finish_non_exhaustive()
    }
}

impl NarrationSession {
    /// Create an idle session.
    pub fn new(config: &NarrationConfig, platform: Platform) -> Self {
        let clock = ProgressClock::new(platform.scheduler.clone(), config.clock.cadence());
        let ambience = AmbienceCoordinator::new(
            platform.ambience,
            platform.scheduler,
            config.ambience.clone(),
        );
        Self {
            speech_config: config.speech.clone(),
            speech: platform.speech,
            audio: platform.audio,
            ambience,
            clock,
            state: SessionState::Idle,
            prepared: None,
            request: None,
            generation: 0,
            epoch: 0,
            current_index: 0,
            run: RunFlags::default(),
            error_message: None,
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The prepared source, if any.
    pub fn source(&self) -> Option<&NarrationSource> {
        self.prepared.as_ref().map(|content| &content.source)
    }

    /// The request the current source was (or is being) prepared from.
    pub fn request(&self) -> Option<&PrepareRequest> {
        self.request.as_ref()
    }

    /// Progress of the current run.
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            elapsed: self.clock.elapsed(),
            total: self.clock.total(),
            current_unit_index: self.current_index,
        }
    }

    /// Last user-facing error.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Dismiss the error message.
    pub fn clear_error(&mut self) {
        self.error_message = None;
    }

    /// The ambience coordinator.
    pub fn ambience(&self) -> &AmbienceCoordinator {
        &self.ambience
    }

    /// The ambience coordinator, for track and volume changes.
    pub fn ambience_mut(&mut self) -> &mut AmbienceCoordinator {
        &mut self.ambience
    }

    /// Everything a front end binds to.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            is_playing: self.state == SessionState::Playing,
            is_paused: self.state == SessionState::Paused,
            is_preparing_content: self.state == SessionState::Preparing,
            current_time: self.clock.elapsed(),
            total_time: self.clock.total(),
            current_sentence_index: self.current_index,
            unit_count: self.prepared.as_ref().map_or(0, |c| c.source.unit_count()),
            source_kind: self.source_kind(),
            error_message: self.error_message.clone(),
            is_background_music_playing: self.ambience.is_playing(),
            ambience: self.ambience.state(),
        }
    }

    fn source_kind(&self) -> Option<SourceKind> {
        self.prepared.as_ref().map(|c| c.source.kind())
    }

    // ------------------------------------------------------------------------
    // Preparation
    // ------------------------------------------------------------------------

    /// Stop anything in progress and enter `Preparing` for `request`.
    ///
    /// The caller runs the actual preparation (see
    /// [`ContentPreparer`](crate::ContentPreparer)) and hands the result to
    /// [`complete_preparation`](Self::complete_preparation) with the
    /// returned ticket. Any earlier ticket becomes stale.
    pub fn begin_preparation(&mut self, request: PrepareRequest) -> PreparationTicket {
        self.stop();
        self.prepared = None;
        self.clock.reset(std::time::Duration::ZERO);
        self.generation += 1;
        self.error_message = None;
        info!(
            generation = self.generation,
            language = %request.language,
            audio_ref = request.audio_ref.as_deref().unwrap_or("-"),
            chars = request.text.len(),
            "Preparing narration"
        );
        self.request = Some(request);
        self.state = SessionState::Preparing;
        self.ambience.prepare_default();
        PreparationTicket {
            generation: self.generation,
        }
    }

    /// Accept the result of a preparation.
    ///
    /// Results for stale tickets are discarded with
    /// [`NarrationError::Cancelled`]. A failure moves the session to `Idle`
    /// and sets the error message.
    pub fn complete_preparation(
        &mut self,
        ticket: PreparationTicket,
        result: Result<PreparedContent, NarrationError>,
    ) -> Result<(), NarrationError> {
        if ticket.generation != self.generation || self.state != SessionState::Preparing {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "Discarding stale preparation result"
            );
            return Err(NarrationError::Cancelled);
        }

        match result {
            Ok(content) => {
                info!(
                    kind = ?content.source.kind(),
                    units = content.source.unit_count(),
                    total_seconds = content.total.as_secs_f64(),
                    "Narration ready"
                );
                self.clock.reset(content.total);
                self.prepared = Some(content);
                self.error_message = self.fallback_notice();
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Narration preparation failed");
                self.state = SessionState::Idle;
                self.error_message = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Switch to another language (or story) mid-session.
    ///
    /// Stops the current run and starts preparing `request`; nothing from
    /// the old source is dispatched afterwards.
    pub fn switch_language(&mut self, request: PrepareRequest) -> PreparationTicket {
        let from = self.request.as_ref().map(|r| r.language);
        info!(from = ?from, to = %request.language, "Switching narration language");
        self.begin_preparation(request)
    }

    /// The language of the current request.
    pub fn language(&self) -> Option<Language> {
        self.request.as_ref().map(|r| r.language)
    }

    // ------------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------------

    /// Start, restart or resume narration.
    ///
    /// - `Preparing`: rejected with [`NarrationError::NotReady`], state
    ///   unchanged.
    /// - `Ready`, or `Idle` with a retained source: starts from the beginning.
    /// - `Paused`: resumes where it left off.
    /// - `Playing`: no-op.
    pub fn play(&mut self) -> Result<(), NarrationError> {
        match self.state {
            SessionState::Playing => Ok(()),
            SessionState::Preparing => {
                debug!("Play requested while preparing");
                let err = NarrationError::NotReady;
                self.error_message = Some(err.to_string());
                Err(err)
            }
            SessionState::Paused => self.resume_run(),
            SessionState::Ready | SessionState::Idle => {
                if self.prepared.is_none() {
                    let err = NarrationError::ContentUnavailable;
                    self.error_message = Some(err.to_string());
                    return Err(err);
                }
                self.start_run()
            }
        }
    }

    /// Pause narration. No-op unless `Playing`.
    pub fn pause(&mut self) {
        if self.state != SessionState::Playing {
            return;
        }
        match self.source_kind() {
            Some(SourceKind::SynthesizedSpeech) => self.speech.pause(),
            Some(SourceKind::PrerenderedAudio) => self.audio.pause(),
            None => {}
        }
        self.clock.cancel();
        self.ambience.pause();
        self.state = SessionState::Paused;
        info!(
            index = self.current_index,
            elapsed_ms = self.clock.elapsed().as_millis() as u64,
            "Narration paused"
        );
    }

    /// Pause when playing, otherwise play.
    pub fn toggle_play_pause(&mut self) -> Result<(), NarrationError> {
        if self.state == SessionState::Playing {
            self.pause();
            Ok(())
        } else {
            self.play()
        }
    }

    /// Stop everything and return to `Idle`.
    ///
    /// Cancels in-flight preparation, force-stops the engine, zeroes
    /// progress and halts ambience. The prepared source is kept so `play()`
    /// can start over. Idempotent.
    pub fn stop(&mut self) {
        let was = self.state;
        self.generation += 1;
        if matches!(was, SessionState::Playing | SessionState::Paused) {
            self.halt_engine();
        }
        self.close_run();
        self.ambience.stop(false);
        self.state = SessionState::Idle;
        if was != SessionState::Idle {
            info!(from = ?was, "Narration stopped");
        }
    }

    /// Force `Idle` and release the source and ambience.
    ///
    /// Call when the story view goes away.
    pub fn teardown(&mut self) {
        self.stop();
        self.prepared = None;
        self.request = None;
        self.clock.reset(std::time::Duration::ZERO);
        self.ambience.release();
        self.error_message = None;
        debug!("Narration session torn down");
    }

    // ------------------------------------------------------------------------
    // Engine callbacks
    // ------------------------------------------------------------------------

    /// Route an engine or timer event.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::UnitStarted(unit) => self.on_unit_started(unit),
            EngineEvent::UnitCompleted(unit) => self.on_unit_completed(unit),
            EngineEvent::UnitFailed { unit, message } => self.on_unit_failed(unit, message),
            EngineEvent::Timer(timer) => self.on_timer(timer),
        }
    }

    /// A unit began producing audio.
    pub fn on_unit_started(&mut self, unit: UnitId) {
        if !self.is_current(unit) {
            trace!(?unit, "Ignoring stale unit start");
            return;
        }
        debug!(index = unit.index, "Unit started");
        if !self.run.unit_started {
            self.run.unit_started = true;
            if self.state == SessionState::Playing {
                self.start_ambience();
            }
        }
    }

    /// A unit finished.
    ///
    /// Speech moves to the next sentence; the last unit ends the run.
    pub fn on_unit_completed(&mut self, unit: UnitId) {
        if !self.is_current(unit) {
            trace!(?unit, "Ignoring stale unit completion");
            return;
        }
        let Some(content) = self.prepared.as_ref() else {
            return;
        };
        let next = unit.index + 1;
        if content.source.kind() == SourceKind::SynthesizedSpeech
            && next < content.source.unit_count()
        {
            debug!(completed = unit.index, next, "Sentence finished");
            self.current_index = next;
            if self.state == SessionState::Playing {
                if let Err(e) = self.dispatch_current() {
                    debug!(error = %e, "Next sentence could not be dispatched");
                }
            } else {
                self.run.dispatch_on_resume = true;
            }
        } else {
            self.finish();
        }
    }

    /// A unit failed inside the engine. Ends the session.
    pub fn on_unit_failed(&mut self, unit: UnitId, message: String) {
        if !self.is_current(unit) {
            trace!(?unit, "Ignoring stale unit failure");
            return;
        }
        let engine = match self.source_kind() {
            Some(SourceKind::PrerenderedAudio) => "audio",
            _ => "speech",
        };
        self.fail(NarrationError::EngineFailure { engine, message });
    }

    /// A repeating timer fired.
    pub fn on_timer(&mut self, timer: TimerId) {
        if self.clock.owns(timer) {
            if self.state != SessionState::Playing {
                self.clock.cancel();
                return;
            }
            match self.source_kind() {
                Some(SourceKind::PrerenderedAudio) => {
                    let position = self.audio.position();
                    self.clock.observe(position);
                }
                Some(SourceKind::SynthesizedSpeech) => {
                    self.clock.advance();
                }
                None => self.clock.cancel(),
            }
            return;
        }
        if !self.ambience.on_timer(timer) {
            trace!(%timer, "Ignoring unknown timer");
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn is_current(&self, unit: UnitId) -> bool {
        unit.epoch == self.epoch
            && unit.index == self.current_index
            && matches!(self.state, SessionState::Playing | SessionState::Paused)
    }

    fn start_run(&mut self) -> Result<(), NarrationError> {
        self.epoch += 1;
        self.current_index = 0;
        self.run = RunFlags::default();
        self.clock.rewind();
        self.error_message = self.fallback_notice();
        self.state = SessionState::Playing;
        info!(epoch = self.epoch, kind = ?self.source_kind(), "Narration started");

        self.dispatch_current()?;
        self.clock.start();
        Ok(())
    }

    fn resume_run(&mut self) -> Result<(), NarrationError> {
        self.state = SessionState::Playing;
        self.error_message = self.fallback_notice();
        match self.source_kind() {
            Some(SourceKind::SynthesizedSpeech) => {
                if std::mem::take(&mut self.run.dispatch_on_resume) {
                    self.dispatch_current()?;
                } else {
                    self.speech.resume();
                }
            }
            Some(SourceKind::PrerenderedAudio) => {
                if let Err(e) = self.audio.resume() {
                    let path = self.prerendered_file().unwrap_or_default();
                    return self.fall_back_to_speech(path, e.to_string());
                }
            }
            None => {}
        }
        self.clock.start();

        if self.run.unit_started {
            if self.run.ambience_started {
                self.ambience.resume();
            } else {
                self.start_ambience();
            }
        }
        info!(index = self.current_index, "Narration resumed");
        Ok(())
    }

    fn dispatch_current(&mut self) -> Result<(), NarrationError> {
        let Some(dispatch) = self.next_dispatch() else {
            let err = NarrationError::ContentUnavailable;
            self.fail(err.clone());
            return Err(err);
        };

        match dispatch {
            Dispatch::Speak(utterance) => {
                debug!(index = utterance.unit.index, text = %utterance.text, "Dispatching sentence");
                if let Err(e) = self.speech.speak(utterance) {
                    let err = NarrationError::EngineFailure {
                        engine: "speech",
                        message: e.to_string(),
                    };
                    self.fail(err.clone());
                    return Err(err);
                }
                Ok(())
            }
            Dispatch::Play { file, unit } => {
                debug!(path = %file.display(), "Starting pre-rendered narration");
                if let Err(e) = self.audio.play(&file, unit) {
                    return self.fall_back_to_speech(file, e.to_string());
                }
                Ok(())
            }
        }
    }

    fn next_dispatch(&self) -> Option<Dispatch> {
        let content = self.prepared.as_ref()?;
        let unit = UnitId {
            epoch: self.epoch,
            index: self.current_index,
        };
        match &content.source {
            NarrationSource::SynthesizedSpeech {
                sentences,
                language,
                rate,
            } => {
                let text = sentences.get(self.current_index)?.clone();
                Some(Dispatch::Speak(Utterance {
                    unit,
                    text,
                    language: *language,
                    rate: *rate,
                    voice: self.speech_config.profile(*language).voice.clone(),
                    lead_in: self.speech_config.lead_in(self.current_index),
                    trailing_pause: self.speech_config.trailing_pause(),
                }))
            }
            NarrationSource::PrerenderedAudio { file, .. } => Some(Dispatch::Play {
                file: file.clone(),
                unit,
            }),
        }
    }

    fn prerendered_file(&self) -> Option<PathBuf> {
        match self.source()? {
            NarrationSource::PrerenderedAudio { file, .. } => Some(file.clone()),
            NarrationSource::SynthesizedSpeech { .. } => None,
        }
    }

    /// Replace an unplayable pre-rendered source with speech and start a
    /// new run, or fail when there is no text to speak.
    fn fall_back_to_speech(&mut self, path: PathBuf, reason: String) -> Result<(), NarrationError> {
        let failure = NarrationError::ResourceLoadFailure { path, reason };
        let fallback = self
            .request
            .as_ref()
            .and_then(|r| synthesized_content(&r.text, r.language, &self.speech_config));

        let Some(content) = fallback else {
            self.fail(failure.clone());
            return Err(failure);
        };

        warn!(error = %failure, "Audio playback failed, falling back to speech");
        self.audio.stop();
        self.ambience.stop(false);
        self.clock.reset(content.total);
        self.prepared = Some(content.with_fallback_reason(failure));
        self.start_run()
    }

    /// The load failure behind the current source, as a user-facing message.
    fn fallback_notice(&self) -> Option<String> {
        self.prepared
            .as_ref()
            .and_then(|content| content.fallback_reason.as_ref())
            .map(ToString::to_string)
    }

    fn start_ambience(&mut self) {
        self.run.ambience_started = true;
        if let Err(e) = self.ambience.start() {
            warn!(error = %e, "Ambience failed to start");
        }
    }

    fn halt_engine(&mut self) {
        match self.source_kind() {
            Some(SourceKind::SynthesizedSpeech) => self.speech.stop(),
            Some(SourceKind::PrerenderedAudio) => self.audio.stop(),
            None => {}
        }
    }

    /// Forget the current run: new epoch, index and progress back to zero.
    fn close_run(&mut self) {
        self.epoch += 1;
        self.current_index = 0;
        self.run = RunFlags::default();
        self.clock.rewind();
    }

    fn finish(&mut self) {
        self.close_run();
        self.ambience.stop(true);
        self.state = SessionState::Idle;
        info!("Narration finished");
    }

    fn fail(&mut self, error: NarrationError) {
        warn!(error = %error, "Narration failed");
        self.stop();
        self.error_message = Some(error.to_string());
    }
}
