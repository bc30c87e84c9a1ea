//! Core types for the narration controller.
//!
//! This module defines the data shared by every layer of the crate:
//! - Narration languages and sources
//! - Session states and the observable snapshot handed to front ends
//! - Ambience tracks and their state
//! - Unit identifiers and utterances passed to speech engines

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::NarrationError;

// ============================================================================
// Language
// ============================================================================

/// A narration language.
///
/// Serialized as its two-letter code (`"en"`, `"es"`) so story catalogs and
/// config files stay short.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum Language {
    /// English narration.
    #[default]
    #[serde(rename = "en", alias = "english")]
    English,
    /// Spanish narration.
    #[serde(rename = "es", alias = "spanish")]
    Spanish,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Language; 2] = [Language::English, Language::Spanish];

    /// The two-letter code used in asset names (`story_en.mp3`, `es/story.mp3`).
    pub const fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
        }
    }

    /// Human readable name.
    pub const fn display_name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Spanish => "Español",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Error returned when a language tag is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    /// Accepts codes, English names and locale tags (`en-US`, `es_MX`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let primary = lower.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "en" | "english" => Ok(Language::English),
            "es" | "spanish" | "español" | "espanol" => Ok(Language::Spanish),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

// ============================================================================
// Narration Source
// ============================================================================

/// What a prepared session will play.
///
/// Chosen once per preparation and never mutated afterwards; switching story
/// or language builds a new one.
#[derive(Debug, Clone, PartialEq)]
pub enum NarrationSource {
    /// A pre-rendered narration file.
    PrerenderedAudio {
        /// Resolved location of the file.
        file: PathBuf,
        /// Decoded length of the file.
        duration: Duration,
    },
    /// Text spoken sentence by sentence through a speech engine.
    SynthesizedSpeech {
        /// Sentences in speaking order. Never empty.
        sentences: Vec<String>,
        /// Language the sentences are spoken in.
        language: Language,
        /// Speech rate multiplier handed to the engine (1.0 = engine default).
        rate: f32,
    },
}

impl NarrationSource {
    /// The kind of this source.
    pub fn kind(&self) -> SourceKind {
        match self {
            NarrationSource::PrerenderedAudio { .. } => SourceKind::PrerenderedAudio,
            NarrationSource::SynthesizedSpeech { .. } => SourceKind::SynthesizedSpeech,
        }
    }

    /// Number of playable units: one for a file, one per sentence for speech.
    pub fn unit_count(&self) -> usize {
        match self {
            NarrationSource::PrerenderedAudio { .. } => 1,
            NarrationSource::SynthesizedSpeech { sentences, .. } => sentences.len(),
        }
    }
}

/// Discriminant of [`NarrationSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A pre-rendered narration file.
    PrerenderedAudio,
    /// Sentence-by-sentence speech synthesis.
    SynthesizedSpeech,
}

/// The outcome of a successful preparation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedContent {
    /// The source to play.
    pub source: NarrationSource,
    /// Total duration shown on the progress bar.
    ///
    /// Decoded for pre-rendered audio, estimated for speech.
    pub total: Duration,
    /// Why a pre-rendered file was passed over for speech, if it was.
    ///
    /// Non-fatal; the session shows it as its error message while this
    /// content plays.
    pub fallback_reason: Option<NarrationError>,
}

impl PreparedContent {
    /// Record the load failure that led to this content.
    #[must_use]
    pub fn with_fallback_reason(mut self, reason: NarrationError) -> Self {
        self.fallback_reason = Some(reason);
        self
    }
}

/// Input to content preparation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareRequest {
    /// Story text in the target language.
    pub text: String,
    /// Target language.
    pub language: Language,
    /// Optional reference to a pre-rendered narration file.
    pub audio_ref: Option<String>,
}

impl PrepareRequest {
    /// Create a request for the given text and language.
    pub fn new(text: impl Into<String>, language: Language) -> Self {
        Self {
            text: text.into(),
            language,
            audio_ref: None,
        }
    }

    /// Attach a pre-rendered audio reference.
    #[must_use]
    pub fn with_audio_ref(mut self, audio_ref: impl Into<String>) -> Self {
        self.audio_ref = Some(audio_ref.into());
        self
    }
}

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a narration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Nothing is playing. A previously prepared source may be retained.
    #[default]
    Idle,
    /// Content preparation is in flight.
    Preparing,
    /// A source is prepared and playback has not started.
    Ready,
    /// Narration is playing.
    Playing,
    /// Narration is paused mid-run.
    Paused,
}

/// Progress of the current playing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    /// Time narrated so far, never above `total`.
    pub elapsed: Duration,
    /// Total duration of the prepared source.
    pub total: Duration,
    /// Sentence being spoken. Always 0 for pre-rendered audio.
    pub current_unit_index: usize,
}

impl ProgressSnapshot {
    /// Fraction of the narration completed, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total.is_zero() {
            return 0.0;
        }
        (self.elapsed.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }
}

// ============================================================================
// Units and Utterances
// ============================================================================

/// Identifies one playable unit of one playing run.
///
/// `epoch` changes every time a run is stopped or a new source is prepared,
/// so callbacks from an old run never match the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId {
    /// Playing-run counter.
    pub epoch: u64,
    /// Sentence index, or 0 for a pre-rendered file.
    pub index: usize,
}

/// A single sentence handed to a speech engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Which unit this is; echoed back in engine callbacks.
    pub unit: UnitId,
    /// The sentence to speak.
    pub text: String,
    /// Language to speak it in.
    pub language: Language,
    /// Rate multiplier (1.0 = engine default).
    pub rate: f32,
    /// Optional engine-specific voice name.
    pub voice: Option<String>,
    /// Silence before the sentence starts.
    pub lead_in: Duration,
    /// Silence after the sentence before completion is reported.
    pub trailing_pause: Duration,
}

// ============================================================================
// Ambience
// ============================================================================

/// The fixed set of ambience tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbienceTrack {
    /// Soft rain on a window.
    GentleRain,
    /// Slow waves on a beach.
    OceanWaves,
    /// Crickets and wind in the trees.
    ForestNight,
    /// A slow music box melody.
    MusicBox,
    /// Even, soft white noise.
    WhiteNoise,
}

impl AmbienceTrack {
    /// Every track, in display order.
    pub const ALL: [AmbienceTrack; 5] = [
        AmbienceTrack::GentleRain,
        AmbienceTrack::OceanWaves,
        AmbienceTrack::ForestNight,
        AmbienceTrack::MusicBox,
        AmbienceTrack::WhiteNoise,
    ];

    /// Identifier used on the command line and in config files.
    pub const fn id(self) -> &'static str {
        match self {
            AmbienceTrack::GentleRain => "gentle-rain",
            AmbienceTrack::OceanWaves => "ocean-waves",
            AmbienceTrack::ForestNight => "forest-night",
            AmbienceTrack::MusicBox => "music-box",
            AmbienceTrack::WhiteNoise => "white-noise",
        }
    }

    /// File stem of the track under the `ambience/` assets folder.
    pub const fn file_stem(self) -> &'static str {
        match self {
            AmbienceTrack::GentleRain => "gentle_rain",
            AmbienceTrack::OceanWaves => "ocean_waves",
            AmbienceTrack::ForestNight => "forest_night",
            AmbienceTrack::MusicBox => "music_box",
            AmbienceTrack::WhiteNoise => "white_noise",
        }
    }

    /// Human readable name.
    pub const fn display_name(self) -> &'static str {
        match self {
            AmbienceTrack::GentleRain => "Gentle Rain",
            AmbienceTrack::OceanWaves => "Ocean Waves",
            AmbienceTrack::ForestNight => "Forest Night",
            AmbienceTrack::MusicBox => "Music Box",
            AmbienceTrack::WhiteNoise => "White Noise",
        }
    }
}

impl fmt::Display for AmbienceTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Error returned when an ambience track id is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ambience track: {0}")]
pub struct UnknownTrack(pub String);

impl FromStr for AmbienceTrack {
    type Err = UnknownTrack;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        AmbienceTrack::ALL
            .into_iter()
            .find(|track| track.id() == wanted)
            .ok_or_else(|| UnknownTrack(s.to_string()))
    }
}

/// Observable state of the ambience coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AmbienceState {
    /// Track that plays when narration starts. `None` disables ambience.
    pub selected_track: Option<AmbienceTrack>,
    /// Whether the track is currently looping (paused counts as not playing).
    pub is_playing: bool,
    /// User volume in `[0, 1]`, before fades are applied.
    pub volume: f32,
}

// ============================================================================
// Session Snapshot
// ============================================================================

/// Everything a front end binds to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// `state == Playing`.
    pub is_playing: bool,
    /// `state == Paused`.
    pub is_paused: bool,
    /// `state == Preparing`.
    pub is_preparing_content: bool,
    /// Elapsed narration time.
    pub current_time: Duration,
    /// Total narration time.
    pub total_time: Duration,
    /// Sentence being spoken (0 for pre-rendered audio).
    pub current_sentence_index: usize,
    /// Number of units in the prepared source (0 when nothing is prepared).
    pub unit_count: usize,
    /// Kind of the prepared source, if any.
    pub source_kind: Option<SourceKind>,
    /// Last user-facing error.
    pub error_message: Option<String>,
    /// Whether ambience is looping.
    pub is_background_music_playing: bool,
    /// Full ambience state.
    pub ambience: AmbienceState,
}
