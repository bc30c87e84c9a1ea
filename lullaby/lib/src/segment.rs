//! Sentence segmentation and duration estimation for synthesized speech.

use std::time::Duration;

use crate::config::SpeechConfig;
use crate::types::Language;

/// Characters that end a sentence.
const TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Closing characters that stay attached to the sentence they close.
const CLOSERS: [char; 7] = ['"', '\'', ')', ']', '”', '’', '»'];

/// Split text into sentences.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
/// the text. Runs of terminators and closing quotes stay with their
/// sentence (`"Really?!"`, `"Goodnight."`). Segments are trimmed and empty
/// ones dropped. When nothing splits out of non-blank text, the whole
/// trimmed text is returned as one sentence.
///
/// ## Examples
///
/// ```
/// use lullaby::segment::split_sentences;
///
/// assert_eq!(split_sentences("One. Two. Three."), vec!["One.", "Two.", "Three."]);
/// assert_eq!(split_sentences("v1.2 is out"), vec!["v1.2 is out"]);
/// assert!(split_sentences("   ").is_empty());
/// ```
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !TERMINATORS.contains(&c) {
            continue;
        }

        while let Some(&next) = chars.peek() {
            if TERMINATORS.contains(&next) || CLOSERS.contains(&next) {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }

        let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
        if at_boundary {
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }
    push_trimmed(&mut sentences, &current);

    if sentences.is_empty() {
        let whole = text.trim();
        if !whole.is_empty() {
            sentences.push(whole.to_string());
        }
    }
    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, segment: &str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

/// Count whitespace-separated words across all sentences.
pub fn word_count(sentences: &[String]) -> usize {
    sentences.iter().map(|s| s.split_whitespace().count()).sum()
}

/// Estimate how long speaking `sentences` takes.
///
/// `words / words_per_second(language) + sentences * inter_sentence_pause`.
pub fn estimate_duration(
    sentences: &[String],
    language: Language,
    speech: &SpeechConfig,
) -> Duration {
    let words = word_count(sentences) as f64;
    let words_per_second = f64::from(speech.profile(language).words_per_second);
    let speaking = if words_per_second > 0.0 {
        Duration::try_from_secs_f64(words / words_per_second).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    };
    let pauses = speech
        .inter_sentence_pause()
        .saturating_mul(u32::try_from(sentences.len()).unwrap_or(u32::MAX));
    speaking.saturating_add(pauses)
}
