//! Recording fakes shared by the session and driver tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lullaby::{
    AmbiencePlayer, AmbienceTrack, AudioEngine, EngineError, EventSink, ManualScheduler,
    NarrationConfig, NarrationSession, Platform, PrepareRequest, PreparedContent, Scheduler,
    SpeechEngine, TimerId, UnitId, Utterance, synthesized_content,
};

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechCall {
    Speak(Utterance),
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioCall {
    Play(PathBuf, UnitId),
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmbienceCall {
    Load(AmbienceTrack),
    Play(f32),
    Pause,
    Resume,
    SetVolume(f32),
    Stop,
}

/// Speech engine that records calls and optionally echoes events.
#[derive(Clone, Default)]
pub struct FakeSpeech {
    pub calls: Arc<Mutex<Vec<SpeechCall>>>,
    pub fail_speak: Arc<Mutex<bool>>,
    /// When set, every `speak` immediately reports start and completion.
    pub echo: Option<EventSink>,
}

impl SpeechEngine for FakeSpeech {
    fn speak(&mut self, utterance: Utterance) -> Result<(), EngineError> {
        if *self.fail_speak.lock().unwrap() {
            return Err(EngineError::Unavailable { kind: "speech" });
        }
        if let Some(sink) = &self.echo {
            sink.unit_started(utterance.unit);
            sink.unit_completed(utterance.unit);
        }
        self.calls.lock().unwrap().push(SpeechCall::Speak(utterance));
        Ok(())
    }

    fn pause(&mut self) {
        self.calls.lock().unwrap().push(SpeechCall::Pause);
    }

    fn resume(&mut self) {
        self.calls.lock().unwrap().push(SpeechCall::Resume);
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(SpeechCall::Stop);
    }
}

/// Audio engine with a settable position.
#[derive(Clone, Default)]
pub struct FakeAudio {
    pub calls: Arc<Mutex<Vec<AudioCall>>>,
    pub position: Arc<Mutex<Duration>>,
    pub fail_play: Arc<Mutex<bool>>,
}

impl AudioEngine for FakeAudio {
    fn play(&mut self, file: &Path, unit: UnitId) -> Result<(), EngineError> {
        if *self.fail_play.lock().unwrap() {
            return Err(EngineError::Decode {
                path: file.to_path_buf(),
                reason: "unsupported codec".into(),
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push(AudioCall::Play(file.to_path_buf(), unit));
        Ok(())
    }

    fn pause(&mut self) {
        self.calls.lock().unwrap().push(AudioCall::Pause);
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(AudioCall::Resume);
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(AudioCall::Stop);
    }

    fn position(&self) -> Duration {
        *self.position.lock().unwrap()
    }
}

/// Ambience player that records calls.
#[derive(Clone, Default)]
pub struct FakeAmbience {
    pub calls: Arc<Mutex<Vec<AmbienceCall>>>,
}

impl AmbiencePlayer for FakeAmbience {
    fn load(&mut self, track: AmbienceTrack) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(AmbienceCall::Load(track));
        Ok(())
    }

    fn play_looping(&mut self, volume: f32) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(AmbienceCall::Play(volume));
        Ok(())
    }

    fn pause(&mut self) {
        self.calls.lock().unwrap().push(AmbienceCall::Pause);
    }

    fn resume(&mut self) {
        self.calls.lock().unwrap().push(AmbienceCall::Resume);
    }

    fn set_volume(&mut self, volume: f32) {
        self.calls.lock().unwrap().push(AmbienceCall::SetVolume(volume));
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push(AmbienceCall::Stop);
    }
}

/// A session wired to fakes and a manual scheduler.
pub struct Harness {
    pub session: NarrationSession,
    pub config: NarrationConfig,
    pub scheduler: Arc<ManualScheduler>,
    pub speech: FakeSpeech,
    pub audio: FakeAudio,
    pub ambience: FakeAmbience,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_speech(FakeSpeech::default())
    }

    pub fn with_speech(speech: FakeSpeech) -> Self {
        let config = NarrationConfig::default();
        let scheduler = Arc::new(ManualScheduler::new());
        let audio = FakeAudio::default();
        let ambience = FakeAmbience::default();
        let platform = Platform {
            speech: Box::new(speech.clone()),
            audio: Box::new(audio.clone()),
            ambience: Box::new(ambience.clone()),
            scheduler: scheduler.clone() as Arc<dyn Scheduler>,
        };
        let session = NarrationSession::new(&config, platform);
        Self {
            session,
            config,
            scheduler,
            speech,
            audio,
            ambience,
        }
    }

    /// Prepare `text` as synthesized speech and wait in `Ready`.
    pub fn ready_with_speech(&mut self, text: &str) {
        let request = PrepareRequest::new(text, lullaby::Language::English);
        let content = synthesized_content(text, request.language, &self.config.speech)
            .expect("text has sentences");
        let ticket = self.session.begin_preparation(request);
        self.session.complete_preparation(ticket, Ok(content)).unwrap();
    }

    /// Prepare a pre-rendered file of `seconds` and wait in `Ready`.
    pub fn ready_with_audio(&mut self, file: &str, seconds: u64, fallback_text: &str) {
        let request =
            PrepareRequest::new(fallback_text, lullaby::Language::English).with_audio_ref(file);
        let duration = Duration::from_secs(seconds);
        let content = PreparedContent {
            source: lullaby::NarrationSource::PrerenderedAudio {
                file: PathBuf::from(file),
                duration,
            },
            total: duration,
            fallback_reason: None,
        };
        let ticket = self.session.begin_preparation(request);
        self.session.complete_preparation(ticket, Ok(content)).unwrap();
    }

    pub fn speech_calls(&self) -> Vec<SpeechCall> {
        self.speech.calls.lock().unwrap().clone()
    }

    pub fn audio_calls(&self) -> Vec<AudioCall> {
        self.audio.calls.lock().unwrap().clone()
    }

    pub fn ambience_calls(&self) -> Vec<AmbienceCall> {
        self.ambience.calls.lock().unwrap().clone()
    }

    /// Utterances handed to the speech engine, in order.
    pub fn spoken(&self) -> Vec<Utterance> {
        self.speech_calls()
            .into_iter()
            .filter_map(|call| match call {
                SpeechCall::Speak(utterance) => Some(utterance),
                _ => None,
            })
            .collect()
    }

    pub fn last_spoken(&self) -> Utterance {
        self.spoken().pop().expect("something was spoken")
    }

    /// The active timer with `period`, if any.
    pub fn timer(&self, period: Duration) -> Option<TimerId> {
        self.scheduler
            .active()
            .into_iter()
            .find(|(_, p)| *p == period)
            .map(|(id, _)| id)
    }

    pub fn clock_timer(&self) -> Option<TimerId> {
        self.timer(self.config.clock.cadence())
    }

    pub fn fade_timer(&self) -> Option<TimerId> {
        self.timer(self.config.ambience.fade_step())
    }

    /// Fire the progress clock `n` times.
    pub fn tick(&mut self, n: usize) {
        for _ in 0..n {
            let timer = self.clock_timer().expect("clock is running");
            self.session.on_timer(timer);
        }
    }

    /// Fire the fade timer until the fade completes.
    pub fn finish_fade(&mut self) {
        while let Some(timer) = self.fade_timer() {
            self.session.on_timer(timer);
        }
    }

    pub fn set_position(&self, position: Duration) {
        *self.audio.position.lock().unwrap() = position;
    }
}
