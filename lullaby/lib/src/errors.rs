//! Error types for the narration controller.

use std::path::PathBuf;

use thiserror::Error;

/// Conditions surfaced by a narration session.
///
/// The session converts every one of these into its observable
/// `error_message` as well as returning it, so front ends can either poll
/// the snapshot or react to the return value.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NarrationError {
    /// Neither a pre-rendered file nor speakable text is available.
    #[error("this story has no narration available")]
    ContentUnavailable,

    /// An audio resource exists but could not be decoded or played.
    #[error("failed to load audio {}: {reason}", path.display())]
    ResourceLoadFailure {
        /// The resource that failed.
        path: PathBuf,
        /// Why it failed.
        reason: String,
    },

    /// `play()` was called while content is still being prepared.
    #[error("still preparing the story, try again in a moment")]
    NotReady,

    /// The speech or audio engine reported an internal error.
    #[error("{engine} engine failed: {message}")]
    EngineFailure {
        /// Which engine failed (`speech`, `audio`).
        engine: &'static str,
        /// Engine-supplied description.
        message: String,
    },

    /// A newer preparation or a stop superseded this one.
    #[error("preparation was cancelled")]
    Cancelled,

    /// The session task has shut down.
    #[error("narration session is closed")]
    SessionClosed,
}

/// Errors returned by engine adapters.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// No program able to do the job is installed.
    #[error("no {kind} program found on this host")]
    Unavailable {
        /// What was looked for (`speech`, `audio player`).
        kind: &'static str,
    },

    /// The program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("{program} exited with status {status:?}: {stderr}")]
    ProcessFailed {
        /// Program name.
        program: String,
        /// Exit code, if any.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// A resource file does not exist.
    #[error("audio resource not found: {}", path.display())]
    MissingResource {
        /// The path that was looked for.
        path: PathBuf,
    },

    /// A resource exists but could not be decoded.
    #[error("failed to decode {}: {reason}", path.display())]
    Decode {
        /// The file being decoded.
        path: PathBuf,
        /// Decoder message.
        reason: String,
    },

    /// A transport command needs a loaded resource.
    #[error("nothing is loaded")]
    NothingLoaded,

    /// A generic IO failure occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned when loading a story catalog.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog {}: {source}", path.display())]
    Read {
        /// Catalog location.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The catalog is not valid JSON for the expected shape.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two stories share an id.
    #[error("duplicate story id: {0}")]
    DuplicateId(String),

    /// No story has the requested id.
    #[error("unknown story: {0}")]
    UnknownStory(String),
}

/// Errors returned when loading configuration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Config location.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is malformed.
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        /// Config location.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its valid range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
