//! Story catalogs.
//!
//! A catalog is a JSON file listing stories with per-language titles, text
//! and optional pre-rendered audio references:
//!
//! ```json
//! {
//!   "stories": [
//!     {
//!       "id": "story42",
//!       "title": { "en": "The Sleepy Owl", "es": "El búho dormilón" },
//!       "text": { "en": "Once upon a time...", "es": "Había una vez..." },
//!       "audio": { "en": "story42_en.mp3" },
//!       "duration_minutes": 3,
//!       "age_range": "3-6"
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::CatalogError;
use crate::types::{Language, PrepareRequest};

/// One story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Unique id.
    pub id: String,
    /// Title per language.
    pub title: BTreeMap<Language, String>,
    /// Narration text per language.
    pub text: BTreeMap<Language, String>,
    /// Pre-rendered audio reference per language.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub audio: BTreeMap<Language, String>,
    /// Approximate reading time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    /// Suggested listener age, free-form (`"3-6"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_range: Option<String>,
}

impl Story {
    /// Title in `language`, falling back to English and then the id.
    pub fn title_for(&self, language: Language) -> &str {
        self.title
            .get(&language)
            .or_else(|| self.title.get(&Language::English))
            .map_or(self.id.as_str(), String::as_str)
    }

    /// Narration text in `language`.
    pub fn text_for(&self, language: Language) -> Option<&str> {
        self.text.get(&language).map(String::as_str)
    }

    /// Pre-rendered audio reference for `language`.
    pub fn audio_for(&self, language: Language) -> Option<&str> {
        self.audio.get(&language).map(String::as_str)
    }

    /// Languages with narration text.
    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.text.keys().copied()
    }

    /// Build a preparation request for `language`.
    ///
    /// Returns `None` when the story has neither text nor audio in that
    /// language.
    pub fn request_for(&self, language: Language) -> Option<PrepareRequest> {
        let text = self.text_for(language);
        let audio = self.audio_for(language);
        if text.is_none() && audio.is_none() {
            return None;
        }
        let request = PrepareRequest::new(text.unwrap_or_default(), language);
        Some(match audio {
            Some(reference) => request.with_audio_ref(reference),
            None => request,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    stories: Vec<Story>,
}

/// Stories in file order, addressable by id.
#[derive(Debug, Clone, Default)]
pub struct StoryCatalog {
    stories: Vec<Story>,
}

impl StoryCatalog {
    /// Read and parse a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json(&content)?;
        debug!(path = %path.display(), stories = catalog.len(), "Loaded story catalog");
        Ok(catalog)
    }

    /// Parse a catalog from JSON text.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Self::from_stories(file.stories)
    }

    /// Build a catalog, rejecting duplicate ids.
    pub fn from_stories(stories: Vec<Story>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for story in &stories {
            if !seen.insert(story.id.as_str()) {
                return Err(CatalogError::DuplicateId(story.id.clone()));
            }
        }
        Ok(Self { stories })
    }

    /// Look a story up by id.
    pub fn get(&self, id: &str) -> Result<&Story, CatalogError> {
        self.stories
            .iter()
            .find(|story| story.id == id)
            .ok_or_else(|| CatalogError::UnknownStory(id.to_string()))
    }

    /// All stories in file order.
    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    /// Number of stories.
    pub fn len(&self) -> usize {
        self.stories.len()
    }

    /// Whether the catalog has no stories.
    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "stories": [
            {
                "id": "story42",
                "title": { "en": "The Sleepy Owl", "es": "El búho dormilón" },
                "text": { "en": "The owl yawned. Goodnight.", "es": "El búho bostezó." },
                "audio": { "en": "story42_en.mp3" },
                "duration_minutes": 3,
                "age_range": "3-6"
            },
            {
                "id": "moon",
                "title": { "en": "Moon" },
                "text": { "en": "The moon rose." }
            }
        ]
    }"#;

    #[test]
    fn parses_stories_in_order() {
        let catalog = StoryCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.stories()[0].id, "story42");
        assert_eq!(catalog.stories()[1].duration_minutes, None);
    }

    #[test]
    fn lookups_by_language() {
        let catalog = StoryCatalog::from_json(CATALOG).unwrap();
        let story = catalog.get("story42").unwrap();
        assert_eq!(story.title_for(Language::Spanish), "El búho dormilón");
        assert_eq!(story.audio_for(Language::English), Some("story42_en.mp3"));
        assert_eq!(story.audio_for(Language::Spanish), None);
        assert_eq!(story.text_for(Language::Spanish), Some("El búho bostezó."));

        let moon = catalog.get("moon").unwrap();
        assert_eq!(moon.title_for(Language::Spanish), "Moon");
        assert_eq!(moon.languages().collect::<Vec<_>>(), vec![Language::English]);
    }

    #[test]
    fn request_carries_text_and_audio() {
        let catalog = StoryCatalog::from_json(CATALOG).unwrap();
        let request = catalog
            .get("story42")
            .unwrap()
            .request_for(Language::English)
            .unwrap();
        assert_eq!(request.text, "The owl yawned. Goodnight.");
        assert_eq!(request.audio_ref.as_deref(), Some("story42_en.mp3"));

        assert!(catalog.get("moon").unwrap().request_for(Language::Spanish).is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = r#"{"stories": [
            {"id": "a", "title": {"en": "A"}, "text": {"en": "A."}},
            {"id": "a", "title": {"en": "B"}, "text": {"en": "B."}}
        ]}"#;
        assert!(matches!(
            StoryCatalog::from_json(json),
            Err(CatalogError::DuplicateId(id)) if id == "a"
        ));
    }

    #[test]
    fn unknown_story_and_bad_json_are_errors() {
        let catalog = StoryCatalog::from_json(CATALOG).unwrap();
        assert!(matches!(catalog.get("nope"), Err(CatalogError::UnknownStory(_))));
        assert!(matches!(
            StoryCatalog::from_json("{\"stories\": 3}"),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoryCatalog::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }
}
