//! Narration configuration.
//!
//! All timing constants used by the controller live here: the progress
//! clock cadence, per-language speech profiles, sentence pauses, ambience
//! fades and asset lookup settings. The whole tree deserializes from JSON
//! with every field optional.
//!
//! ## Examples
//!
//! ```
//! use lullaby::config::NarrationConfig;
//! use lullaby::Language;
//!
//! let config: NarrationConfig =
//!     serde_json::from_str(r#"{ "speech": { "spanish": { "words_per_second": 2.0 } } }"#)
//!         .unwrap();
//! assert_eq!(config.speech.profile(Language::Spanish).words_per_second, 2.0);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::types::{AmbienceTrack, Language};

/// Environment variable overriding [`AssetsConfig::root`].
pub const ASSETS_ENV: &str = "LULLABY_ASSETS";

/// Slowest narration pace accepted, in words per second.
pub const MIN_WORDS_PER_SECOND: f32 = 0.1;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Progress clock settings.
    pub clock: ClockConfig,
    /// Speech synthesis settings.
    pub speech: SpeechConfig,
    /// Background ambience settings.
    pub ambience: AmbienceConfig,
    /// Asset lookup settings.
    pub assets: AssetsConfig,
}

impl NarrationConfig {
    /// Default config location: `<config dir>/lullaby/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lullaby").join("config.json"))
    }

    /// Load a config file.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load from `path`, or from [`default_path`](Self::default_path) when
    /// `None`, then apply environment overrides.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `LULLABY_ASSETS`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(root) = std::env::var_os(ASSETS_ENV).filter(|v| !v.is_empty()) {
            self.assets.root = Some(PathBuf::from(root));
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.cadence_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "clock.cadence_ms",
                reason: "must be greater than zero".into(),
            });
        }
        for language in Language::ALL {
            let profile = self.speech.profile(language);
            if !(profile.words_per_second >= MIN_WORDS_PER_SECOND) {
                return Err(ConfigError::Invalid {
                    field: "speech.words_per_second",
                    reason: format!("{language}: must be at least {MIN_WORDS_PER_SECOND}"),
                });
            }
            if !(profile.rate > 0.0) {
                return Err(ConfigError::Invalid {
                    field: "speech.rate",
                    reason: format!("{language}: must be positive"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.ambience.volume) {
            return Err(ConfigError::Invalid {
                field: "ambience.volume",
                reason: "must be between 0.0 and 1.0".into(),
            });
        }
        if self.ambience.fade_step_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ambience.fade_step_ms",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Progress clock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Tick period in milliseconds.
    pub cadence_ms: u64,
}

impl ClockConfig {
    /// Tick period.
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { cadence_ms: 100 }
    }
}

// ============================================================================
// Speech
// ============================================================================

/// How one language is spoken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageProfile {
    /// Average narration pace, used to estimate total duration.
    pub words_per_second: f32,
    /// Rate multiplier handed to the speech engine.
    pub rate: f32,
    /// Engine-specific voice name.
    pub voice: Option<String>,
}

impl LanguageProfile {
    /// Bedtime English: a little slower than conversational speech.
    pub fn english() -> Self {
        Self {
            words_per_second: 2.3,
            rate: 0.85,
            voice: None,
        }
    }

    /// Bedtime Spanish: slower again, Spanish words carry more syllables.
    pub fn spanish() -> Self {
        Self {
            words_per_second: 2.1,
            rate: 0.8,
            voice: None,
        }
    }
}

impl Default for LanguageProfile {
    fn default() -> Self {
        Self::english()
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// English profile.
    pub english: LanguageProfile,
    /// Spanish profile.
    pub spanish: LanguageProfile,
    /// Pause counted per sentence in the duration estimate.
    pub inter_sentence_pause_ms: u64,
    /// Lead-in before the first sentence.
    pub first_sentence_lead_in_ms: u64,
    /// Lead-in before every later sentence.
    pub sentence_lead_in_ms: u64,
    /// Silence after each sentence.
    pub sentence_trailing_pause_ms: u64,
}

impl SpeechConfig {
    /// Profile for a language.
    pub fn profile(&self, language: Language) -> &LanguageProfile {
        match language {
            Language::English => &self.english,
            Language::Spanish => &self.spanish,
        }
    }

    /// Pause counted per sentence in the duration estimate.
    pub fn inter_sentence_pause(&self) -> Duration {
        Duration::from_millis(self.inter_sentence_pause_ms)
    }

    /// Lead-in for the sentence at `index`.
    pub fn lead_in(&self, index: usize) -> Duration {
        if index == 0 {
            Duration::from_millis(self.first_sentence_lead_in_ms)
        } else {
            Duration::from_millis(self.sentence_lead_in_ms)
        }
    }

    /// Silence after each sentence.
    pub fn trailing_pause(&self) -> Duration {
        Duration::from_millis(self.sentence_trailing_pause_ms)
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            english: LanguageProfile::english(),
            spanish: LanguageProfile::spanish(),
            inter_sentence_pause_ms: 800,
            first_sentence_lead_in_ms: 300,
            sentence_lead_in_ms: 600,
            sentence_trailing_pause_ms: 200,
        }
    }
}

// ============================================================================
// Ambience
// ============================================================================

/// Background ambience settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbienceConfig {
    /// Track selected when a session is created. `None` disables ambience.
    pub default_track: Option<AmbienceTrack>,
    /// Initial user volume, kept low relative to narration.
    pub volume: f32,
    /// Fade-in length.
    pub fade_in_ms: u64,
    /// Fade-out length.
    pub fade_out_ms: u64,
    /// Period of fade volume steps.
    pub fade_step_ms: u64,
}

impl AmbienceConfig {
    /// Fade-in length.
    pub fn fade_in(&self) -> Duration {
        Duration::from_millis(self.fade_in_ms)
    }

    /// Fade-out length.
    pub fn fade_out(&self) -> Duration {
        Duration::from_millis(self.fade_out_ms)
    }

    /// Period of fade volume steps.
    pub fn fade_step(&self) -> Duration {
        Duration::from_millis(self.fade_step_ms)
    }
}

impl Default for AmbienceConfig {
    fn default() -> Self {
        Self {
            default_track: Some(AmbienceTrack::MusicBox),
            volume: 0.3,
            fade_in_ms: 2_000,
            fade_out_ms: 1_500,
            fade_step_ms: 50,
        }
    }
}

// ============================================================================
// Assets
// ============================================================================

/// Asset lookup settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Root folder of narration and ambience files.
    pub root: Option<PathBuf>,
    /// Extensions tried, in order, for references without one.
    pub extensions: Vec<String>,
}

impl AssetsConfig {
    /// The configured root, or the current directory.
    pub fn root_or_cwd(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: None,
            extensions: ["mp3", "m4a", "wav", "aac", "caf"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}
