//! Lullaby
//!
//! Playback controller for narrated bedtime stories: pre-rendered audio when
//! a file exists, sentence-by-sentence speech synthesis otherwise, with a
//! looping ambience track underneath.
//!
//! ## Features
//!
//! - **One state machine**: [`NarrationSession`] drives
//!   `Idle → Preparing → Ready → Playing ⇄ Paused → Idle` and rejects stale
//!   engine callbacks by run epoch
//! - **Pluggable engines**: speech, playback, ambience and timers sit behind
//!   traits; [`host`] implements them with the host's `say`/`espeak-ng` and
//!   `mpv`/`ffplay`
//! - **Asset resolution**: language subfolder, language suffix, then the
//!   assets root
//! - **Async driver**: [`Narrator`] runs a session on a tokio task and
//!   publishes [`SessionSnapshot`]s on a watch channel
//!
//! ## Module Structure
//!
//! - [`types`] - Languages, sources, states and snapshots
//! - [`errors`] - Error types
//! - [`traits`] - Engine seams and the event sink
//! - [`session`] - The narration state machine
//! - [`driver`] - The async `Narrator`
//! - [`host`] - Host-process engine adapters

pub mod ambience;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod driver;
pub mod errors;
pub mod host;
pub mod preparer;
pub mod probe;
pub mod resolve;
pub mod segment;
pub mod session;
pub mod traits;
pub mod types;

pub use ambience::AmbienceCoordinator;
pub use catalog::{Story, StoryCatalog};
pub use clock::{ManualScheduler, ProgressClock, Scheduler, TimerId};
pub use config::NarrationConfig;
pub use driver::Narrator;
pub use errors::{CatalogError, ConfigError, EngineError, NarrationError};
pub use preparer::{ContentPreparer, synthesized_content};
pub use probe::{MediaProbe, SymphoniaProbe};
pub use resolve::{AssetLookup, AssetResolver, ResolutionStrategy, ResolvedAsset};
pub use session::{NarrationSession, Platform, PreparationTicket};
pub use traits::{AmbiencePlayer, AudioEngine, EngineEvent, EventSink, SpeechEngine};
pub use types::{
    AmbienceState, AmbienceTrack, Language, NarrationSource, PrepareRequest, PreparedContent,
    ProgressSnapshot, SessionSnapshot, SessionState, SourceKind, UnitId, Utterance,
};
