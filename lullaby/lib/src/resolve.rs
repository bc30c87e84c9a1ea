//! Language-qualified asset resolution.
//!
//! Narration files are found by trying an ordered list of strategies under
//! an assets root. Each strategy proposes candidate paths and reports
//! whether one of them exists:
//!
//! 1. [`ResolutionStrategy::LanguageSubfolder`] - `<root>/<lang>/<name>`
//! 2. [`ResolutionStrategy::LanguageSuffix`] - `<root>/<stem>_<lang>.<ext>`
//! 3. [`ResolutionStrategy::RootFallback`] - `<root>/<name>`
//!
//! References without an extension try every configured extension in
//! order within each strategy. Existence checks go through [`AssetLookup`]
//! so the policy can be tested without touching the filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::AssetsConfig;
use crate::types::Language;

/// Answers whether a candidate path exists.
pub trait AssetLookup: Send + Sync {
    /// `true` when `path` is a readable file.
    fn is_file(&self, path: &Path) -> bool;
}

/// [`AssetLookup`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLookup;

impl AssetLookup for FsLookup {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// One way of turning a reference into candidate paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStrategy {
    /// `<root>/<lang>/<name>`
    LanguageSubfolder,
    /// `<root>/<stem>_<lang>.<ext>`, skipped when the stem already ends in
    /// `_<lang>`.
    LanguageSuffix,
    /// `<root>/<name>`
    RootFallback,
}

impl ResolutionStrategy {
    /// The order existing asset layouts depend on.
    pub const DEFAULT_ORDER: [ResolutionStrategy; 3] = [
        ResolutionStrategy::LanguageSubfolder,
        ResolutionStrategy::LanguageSuffix,
        ResolutionStrategy::RootFallback,
    ];

    /// Candidate paths for `reference`, in the order they are checked.
    pub fn candidates(
        self,
        root: &Path,
        reference: &Path,
        language: Language,
        extensions: &[String],
    ) -> Vec<PathBuf> {
        let names = with_extensions(reference, extensions);
        match self {
            ResolutionStrategy::LanguageSubfolder => names
                .into_iter()
                .map(|name| root.join(language.code()).join(name))
                .collect(),
            ResolutionStrategy::LanguageSuffix => {
                let suffix = format!("_{}", language.code());
                names
                    .into_iter()
                    .filter_map(|name| {
                        let stem = name.file_stem()?.to_str()?;
                        if stem.ends_with(&suffix) {
                            return None;
                        }
                        let mut file_name = format!("{stem}{suffix}");
                        if let Some(ext) = name.extension().and_then(|e| e.to_str()) {
                            file_name.push('.');
                            file_name.push_str(ext);
                        }
                        Some(root.join(name.with_file_name(file_name)))
                    })
                    .collect()
            }
            ResolutionStrategy::RootFallback => {
                names.into_iter().map(|name| root.join(name)).collect()
            }
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionStrategy::LanguageSubfolder => "language subfolder",
            ResolutionStrategy::LanguageSuffix => "language suffix",
            ResolutionStrategy::RootFallback => "root fallback",
        };
        f.write_str(label)
    }
}

/// Expand a reference without an extension into one name per extension.
fn with_extensions(reference: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if reference.extension().is_some() || extensions.is_empty() {
        return vec![reference.to_path_buf()];
    }
    extensions
        .iter()
        .map(|ext| reference.with_extension(ext.trim_start_matches('.')))
        .collect()
}

/// A resolved asset and the strategy that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    /// Location of the file.
    pub path: PathBuf,
    /// The strategy that matched.
    pub strategy: ResolutionStrategy,
}

/// Resolves asset references against a root folder.
#[derive(Clone)]
pub struct AssetResolver {
    root: PathBuf,
    strategies: Vec<ResolutionStrategy>,
    extensions: Vec<String>,
    lookup: Arc<dyn AssetLookup>,
}

impl fmt::Debug for AssetResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetResolver")
            .field("root", &self.root)
            .field("strategies", &self.strategies)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl AssetResolver {
    /// A filesystem resolver with the default strategy order.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            strategies: ResolutionStrategy::DEFAULT_ORDER.to_vec(),
            extensions: AssetsConfig::default().extensions,
            lookup: Arc::new(FsLookup),
        }
    }

    /// A filesystem resolver built from config.
    pub fn from_config(assets: &AssetsConfig) -> Self {
        Self::new(assets.root_or_cwd()).with_extensions(assets.extensions.clone())
    }

    /// Replace the existence check.
    #[must_use]
    pub fn with_lookup(mut self, lookup: impl AssetLookup + 'static) -> Self {
        self.lookup = Arc::new(lookup);
        self
    }

    /// Replace the strategy order.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<ResolutionStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Replace the extensions tried for references without one.
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// The assets root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Strategies in the order they are tried.
    pub fn strategies(&self) -> &[ResolutionStrategy] {
        &self.strategies
    }

    /// Find `reference` for `language`, trying each strategy in order.
    pub fn resolve(&self, reference: &str, language: Language) -> Option<ResolvedAsset> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let reference = Path::new(reference);

        for &strategy in &self.strategies {
            for candidate in
                strategy.candidates(&self.root, reference, language, &self.extensions)
            {
                trace!(path = %candidate.display(), %strategy, "Checking asset candidate");
                if self.lookup.is_file(&candidate) {
                    debug!(path = %candidate.display(), %strategy, "Resolved asset");
                    return Some(ResolvedAsset {
                        path: candidate,
                        strategy,
                    });
                }
            }
        }

        debug!(reference = %reference.display(), %language, "Asset not found");
        None
    }

    /// Find a language-independent asset under `folder` (e.g. `ambience`).
    pub fn resolve_shared(&self, folder: &str, stem: &str) -> Option<PathBuf> {
        let reference = Path::new(folder).join(stem);
        with_extensions(&reference, &self.extensions)
            .into_iter()
            .map(|name| self.root.join(name))
            .find(|candidate| self.lookup.is_file(candidate))
    }
}
