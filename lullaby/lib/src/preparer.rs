//! Content preparation: turning story text into a [`NarrationSource`].
//!
//! Asset lookup, duration probing and sentence segmentation are blocking
//! work, so [`ContentPreparer::prepare`] runs them on tokio's blocking pool
//! and the control task only awaits the result.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::errors::NarrationError;
use crate::probe::{MediaProbe, SymphoniaProbe};
use crate::resolve::AssetResolver;
use crate::segment::{estimate_duration, split_sentences};
use crate::types::{Language, NarrationSource, PrepareRequest, PreparedContent};

/// Builds a [`PreparedContent`] for a request.
///
/// Cheap to clone; clones share the resolver and probe.
#[derive(Clone)]
pub struct ContentPreparer {
    resolver: AssetResolver,
    probe: Arc<dyn MediaProbe>,
    speech: SpeechConfig,
}

impl fmt::Debug for ContentPreparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentPreparer")
            .field("resolver", &self.resolver)
            .field("speech", &self.speech)
            .finish_non_exhaustive()
    }
}

impl ContentPreparer {
    /// A preparer that probes files with `symphonia`.
    pub fn new(resolver: AssetResolver, speech: SpeechConfig) -> Self {
        Self {
            resolver,
            probe: Arc::new(SymphoniaProbe),
            speech,
        }
    }

    /// Replace the duration probe.
    #[must_use]
    pub fn with_probe(mut self, probe: impl MediaProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Speech settings used for segmentation and estimates.
    pub fn speech(&self) -> &SpeechConfig {
        &self.speech
    }

    /// Prepare `request` on the blocking pool.
    ///
    /// Dropping the returned future abandons the result; the blocking work
    /// itself runs to completion and is discarded.
    pub async fn prepare(&self, request: PrepareRequest) -> Result<PreparedContent, NarrationError> {
        let preparer = self.clone();
        tokio::task::spawn_blocking(move || preparer.prepare_blocking(&request))
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    NarrationError::Cancelled
                } else {
                    NarrationError::EngineFailure {
                        engine: "preparer",
                        message: e.to_string(),
                    }
                }
            })?
    }

    /// Prepare `request` on the current thread.
    ///
    /// Prefers a resolvable pre-rendered file; falls back to speech when
    /// there is none or it cannot be decoded.
    pub fn prepare_blocking(
        &self,
        request: &PrepareRequest,
    ) -> Result<PreparedContent, NarrationError> {
        let mut load_failure = None;

        if let Some(reference) = request.audio_ref.as_deref() {
            match self.resolver.resolve(reference, request.language) {
                Some(asset) => match self.probe.duration(&asset.path) {
                    Ok(duration) => {
                        info!(
                            path = %asset.path.display(),
                            strategy = %asset.strategy,
                            seconds = duration.as_secs_f64(),
                            "Prepared pre-rendered narration"
                        );
                        return Ok(PreparedContent {
                            source: NarrationSource::PrerenderedAudio {
                                file: asset.path,
                                duration,
                            },
                            total: duration,
                            fallback_reason: None,
                        });
                    }
                    Err(e) => {
                        warn!(
                            path = %asset.path.display(),
                            error = %e,
                            "Pre-rendered narration unusable, falling back to speech"
                        );
                        load_failure = Some(NarrationError::ResourceLoadFailure {
                            path: asset.path,
                            reason: e.to_string(),
                        });
                    }
                },
                None => {
                    debug!(reference, language = %request.language, "No pre-rendered narration");
                }
            }
        }

        match (
            synthesized_content(&request.text, request.language, &self.speech),
            load_failure,
        ) {
            (Some(content), Some(failure)) => Ok(content.with_fallback_reason(failure)),
            (Some(content), None) => Ok(content),
            (None, failure) => Err(failure.unwrap_or(NarrationError::ContentUnavailable)),
        }
    }
}

/// Segment `text` into a speech source with an estimated total.
///
/// Returns `None` when the text has nothing to speak.
pub fn synthesized_content(
    text: &str,
    language: Language,
    speech: &SpeechConfig,
) -> Option<PreparedContent> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return None;
    }
    let total = estimate_duration(&sentences, language, speech);
    info!(
        sentences = sentences.len(),
        %language,
        estimated_seconds = total.as_secs_f64(),
        "Prepared synthesized narration"
    );
    Some(PreparedContent {
        source: NarrationSource::SynthesizedSpeech {
            sentences,
            language,
            rate: speech.profile(language).rate,
        },
        total,
        fallback_reason: None,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::*;
    use crate::errors::EngineError;
    use crate::resolve::AssetLookup;

    struct Files(Vec<PathBuf>);

    impl AssetLookup for Files {
        fn is_file(&self, path: &Path) -> bool {
            self.0.iter().any(|p| p == path)
        }
    }

    /// Probe with fixed durations; unknown paths fail to decode.
    struct Durations(HashMap<PathBuf, Duration>);

    impl MediaProbe for Durations {
        fn duration(&self, path: &Path) -> Result<Duration, EngineError> {
            self.0.get(path).copied().ok_or_else(|| EngineError::Decode {
                path: path.to_path_buf(),
                reason: "corrupt".into(),
            })
        }
    }

    fn preparer(files: &[&str], durations: &[(&str, u64)]) -> ContentPreparer {
        let resolver = AssetResolver::new("/assets")
            .with_lookup(Files(files.iter().map(PathBuf::from).collect()));
        let probe = Durations(
            durations
                .iter()
                .map(|(p, s)| (PathBuf::from(p), Duration::from_secs(*s)))
                .collect(),
        );
        ContentPreparer::new(resolver, SpeechConfig::default()).with_probe(probe)
    }

    #[test]
    fn resolvable_audio_wins_and_skips_segmentation() {
        let preparer = preparer(
            &["/assets/story42_en.mp3"],
            &[("/assets/story42_en.mp3", 180)],
        );
        let request =
            PrepareRequest::new("One. Two.", Language::English).with_audio_ref("story42_en.mp3");

        let content = preparer.prepare_blocking(&request).unwrap();
        assert_eq!(
            content.source,
            NarrationSource::PrerenderedAudio {
                file: PathBuf::from("/assets/story42_en.mp3"),
                duration: Duration::from_secs(180),
            }
        );
        assert_eq!(content.total, Duration::from_secs(180));
    }

    #[test]
    fn unresolvable_audio_falls_back_to_speech() {
        let preparer = preparer(&[], &[]);
        let request =
            PrepareRequest::new("One. Two. Three.", Language::English).with_audio_ref("missing");

        let content = preparer.prepare_blocking(&request).unwrap();
        match content.source {
            NarrationSource::SynthesizedSpeech {
                sentences,
                language,
                ..
            } => {
                assert_eq!(sentences, vec!["One.", "Two.", "Three."]);
                assert_eq!(language, Language::English);
            }
            other => panic!("expected speech, got {other:?}"),
        }
        assert!(content.total > Duration::ZERO);
    }

    #[test]
    fn undecodable_audio_falls_back_to_speech() {
        let preparer = preparer(&["/assets/es/broken.mp3"], &[]);
        let request = PrepareRequest::new("Hola.", Language::Spanish).with_audio_ref("broken.mp3");
        let content = preparer.prepare_blocking(&request).unwrap();
        assert_eq!(
            content.source.kind(),
            crate::types::SourceKind::SynthesizedSpeech
        );
        assert!(matches!(
            content.fallback_reason,
            Some(NarrationError::ResourceLoadFailure { ref path, .. })
                if path == Path::new("/assets/es/broken.mp3")
        ));
    }

    #[test]
    fn undecodable_audio_without_text_is_a_load_failure() {
        let preparer = preparer(&["/assets/es/broken.mp3"], &[]);
        let request = PrepareRequest::new("  ", Language::Spanish).with_audio_ref("broken.mp3");
        assert!(matches!(
            preparer.prepare_blocking(&request),
            Err(NarrationError::ResourceLoadFailure { .. })
        ));
    }

    #[test]
    fn nothing_to_narrate_is_content_unavailable() {
        let preparer = preparer(&[], &[]);
        let request = PrepareRequest::new("", Language::English);
        assert_eq!(
            preparer.prepare_blocking(&request),
            Err(NarrationError::ContentUnavailable)
        );
    }

    #[test]
    fn speech_rate_comes_from_language_profile() {
        let speech = SpeechConfig::default();
        let content = synthesized_content("Hola.", Language::Spanish, &speech).unwrap();
        match content.source {
            NarrationSource::SynthesizedSpeech { rate, .. } => {
                assert_eq!(rate, speech.spanish.rate);
            }
            other => panic!("expected speech, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn async_prepare_matches_blocking_prepare() {
        let preparer = preparer(&[], &[]);
        let request = PrepareRequest::new("Sleep well.", Language::English);
        let async_result = preparer.prepare(request.clone()).await;
        assert_eq!(async_result, preparer.prepare_blocking(&request));
    }
}
