//! Lullaby CLI - narrate bedtime stories in the terminal

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use lullaby::{
    AmbienceTrack, AssetResolver, CatalogError, ConfigError, ContentPreparer, EventSink,
    Language, NarrationConfig, NarrationError, NarrationSession, Narrator, PrepareRequest,
    SessionSnapshot, SessionState, SourceKind, StoryCatalog, host,
};
use owo_colors::OwoColorize;
use thiserror::Error;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Narrate bedtime stories with soft background ambience.
///
/// Examples:
///   lullaby list --catalog stories.json
///   lullaby narrate --catalog stories.json --story story42 --language es
///   lullaby say "Once upon a time, a small owl could not sleep."
#[derive(Debug, Parser)]
#[command(name = "lullaby")]
#[command(version)]
#[command(about = "Narrate bedtime stories with soft background ambience")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    log_verbosity: u8,

    /// Config file [default: <config dir>/lullaby/config.json]
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the stories in a catalog
    List {
        /// Story catalog (JSON)
        #[arg(long, value_name = "PATH")]
        catalog: PathBuf,

        /// Language for titles (en, es)
        #[arg(short, long, default_value = "en")]
        language: Language,
    },

    /// List the ambience tracks
    Tracks,

    /// Narrate a story from a catalog
    Narrate {
        /// Story catalog (JSON)
        #[arg(long, value_name = "PATH")]
        catalog: PathBuf,

        /// Story id
        #[arg(long, value_name = "ID")]
        story: String,

        /// Narration language (en, es)
        #[arg(short, long, default_value = "en")]
        language: Language,

        #[command(flatten)]
        ambience: AmbienceArgs,
    },

    /// Narrate ad-hoc text with speech synthesis
    Say {
        /// Text to narrate
        #[arg(value_name = "TEXT", required = true)]
        text: Vec<String>,

        /// Narration language (en, es)
        #[arg(short, long, default_value = "en")]
        language: Language,

        #[command(flatten)]
        ambience: AmbienceArgs,
    },
}

#[derive(Debug, clap::Args)]
struct AmbienceArgs {
    /// Ambience track to loop under the narration
    #[arg(long, value_name = "TRACK", conflicts_with = "no_ambience")]
    ambience: Option<AmbienceTrack>,

    /// Ambience volume between 0.0 and 1.0
    #[arg(long, value_name = "VOLUME", value_parser = parse_volume)]
    volume: Option<f32>,

    /// Narrate without ambience
    #[arg(long)]
    no_ambience: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Narration(#[from] NarrationError),

    #[error("story '{story}' has no {language} narration")]
    MissingLanguage { story: String, language: Language },

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

fn parse_volume(s: &str) -> Result<f32, String> {
    let volume: f32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(format!("volume must be between 0.0 and 1.0, got {volume}"))
    }
}

/// Initialize tracing on stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let base_filter = match std::env::var("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => match verbose {
            0 => "warn".to_string(),
            1 => "warn,lullaby=info".to_string(),
            2 => "info,lullaby=debug".to_string(),
            _ => "debug,lullaby=trace".to_string(),
        },
    };

    let filter = EnvFilter::try_new(&base_filter).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

fn load_config(path: Option<&Path>) -> Result<NarrationConfig, CliError> {
    let config = NarrationConfig::load_or_default(path)?;
    config.validate()?;
    Ok(config)
}

/// `mm:ss`, or `h:mm:ss` past an hour.
fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// One-line status for a snapshot, without colour.
fn progress_line(snapshot: &SessionSnapshot) -> String {
    let marker = match snapshot.state {
        SessionState::Playing => "▶",
        SessionState::Paused => "⏸",
        SessionState::Preparing => "…",
        SessionState::Ready | SessionState::Idle => "■",
    };
    let mut line = format!(
        "{marker} {} / {}",
        format_clock(snapshot.current_time),
        format_clock(snapshot.total_time)
    );
    if snapshot.source_kind == Some(SourceKind::SynthesizedSpeech) && snapshot.unit_count > 0 {
        line.push_str(&format!(
            "  sentence {}/{}",
            snapshot.current_sentence_index + 1,
            snapshot.unit_count
        ));
    }
    if snapshot.is_background_music_playing
        && let Some(track) = snapshot.ambience.selected_track
    {
        line.push_str(&format!("  ♪ {}", track.display_name()));
    }
    line
}

fn list(catalog: &Path, language: Language) -> Result<(), CliError> {
    let catalog = StoryCatalog::load(catalog)?;
    let mut out = std::io::stdout().lock();
    if catalog.is_empty() {
        writeln!(out, "{}", "(no stories)".dimmed())?;
        return Ok(());
    }
    let width = catalog.stories().iter().map(|s| s.id.len()).max().unwrap_or(0);
    for story in catalog.stories() {
        let mut details = Vec::new();
        if let Some(minutes) = story.duration_minutes {
            details.push(format!("{minutes} min"));
        }
        if let Some(ages) = &story.age_range {
            details.push(format!("ages {ages}"));
        }
        if story.audio_for(language).is_some() {
            details.push("narrated".to_string());
        }
        writeln!(
            out,
            "{:width$}  {}  {}",
            story.id.bold(),
            story.title_for(language),
            details.join(", ").dimmed(),
        )?;
    }
    Ok(())
}

fn tracks() -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    for track in AmbienceTrack::ALL {
        writeln!(out, "{:14}  {}", track.id().bold(), track.display_name())?;
    }
    Ok(())
}

async fn narrate(
    config: NarrationConfig,
    request: PrepareRequest,
    ambience: AmbienceArgs,
) -> Result<(), CliError> {
    let resolver = AssetResolver::from_config(&config.assets);
    let (sink, events) = EventSink::channel();
    let platform = host::host_platform(sink, resolver.clone(), tokio::runtime::Handle::current());
    let session = NarrationSession::new(&config, platform);
    let preparer = ContentPreparer::new(resolver, config.speech.clone());
    let narrator = Narrator::spawn(session, preparer, events);

    if ambience.no_ambience {
        narrator.select_track(None).await?;
    } else if let Some(track) = ambience.ambience {
        narrator.select_track(Some(track)).await?;
    }
    if let Some(volume) = ambience.volume {
        narrator.set_ambience_volume(volume)?;
    }

    let start = async {
        match narrator.prepare_content(request).await {
            Ok(()) => narrator.play().await,
            Err(e) => Err(e),
        }
    };
    let result = match unless_interrupted(start, tokio::signal::ctrl_c()).await {
        Some(Ok(())) => follow(&narrator).await,
        Some(Err(e)) => Err(e.into()),
        None => {
            tracing::info!("Interrupted before narration started");
            narrator.stop().map_err(CliError::from)
        }
    };
    narrator.shutdown().await;
    result
}

/// Run `work` to completion unless `interrupt` resolves first.
///
/// Returns `None` when interrupted; `work` is dropped at its current await.
async fn unless_interrupted<T>(
    work: impl Future<Output = T>,
    interrupt: impl Future,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = interrupt => None,
        output = work => Some(output),
    }
}

/// Render progress until narration ends or Ctrl-C.
async fn follow(narrator: &Narrator) -> Result<(), CliError> {
    let mut updates = narrator.subscribe();
    let mut out = std::io::stderr();
    let mut notice: Option<String> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                narrator.stop()?;
                writeln!(out)?;
                tracing::info!("Interrupted");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Err(NarrationError::SessionClosed.into());
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.state != SessionState::Idle
                    && snapshot.error_message.is_some()
                    && snapshot.error_message != notice
                {
                    notice = snapshot.error_message.clone();
                    if let Some(message) = &notice {
                        writeln!(out, "\r\x1b[2K{} {message}", "note:".yellow().bold())?;
                    }
                }
                write!(out, "\r\x1b[2K{}", progress_line(&snapshot).cyan())?;
                out.flush()?;

                if snapshot.state == SessionState::Idle {
                    writeln!(out)?;
                    match snapshot.error_message {
                        Some(message) if Some(&message) != notice.as_ref() => {
                            writeln!(out, "{} {message}", "narration stopped:".red().bold())?;
                        }
                        _ => writeln!(out, "{}", "Sweet dreams.".green())?,
                    }
                    return Ok(());
                }
            }
        }
    }
}

fn story_request(
    catalog: &Path,
    story: &str,
    language: Language,
) -> Result<PrepareRequest, CliError> {
    let catalog = StoryCatalog::load(catalog)?;
    let story = catalog.get(story)?;
    story
        .request_for(language)
        .ok_or_else(|| CliError::MissingLanguage {
            story: story.id.clone(),
            language,
        })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::List { catalog, language } => list(&catalog, language),
        Commands::Tracks => tracks(),
        Commands::Narrate {
            catalog,
            story,
            language,
            ambience,
        } => {
            let request = story_request(&catalog, &story, language)?;
            let config = load_config(cli.config.as_deref())?;
            narrate(config, request, ambience).await
        }
        Commands::Say {
            text,
            language,
            ambience,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let request = PrepareRequest::new(text.join(" "), language);
            narrate(config, request, ambience).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_verbosity);

    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lullaby::AmbienceState;

    #[test]
    fn clock_formats_minutes_and_hours() {
        assert_eq!(format_clock(Duration::from_secs(0)), "00:00");
        assert_eq!(format_clock(Duration::from_secs(185)), "03:05");
        assert_eq!(format_clock(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn volume_must_be_a_fraction() {
        assert_eq!(parse_volume("0.4"), Ok(0.4));
        assert!(parse_volume("1.5").is_err());
        assert!(parse_volume("loud").is_err());
    }

    #[test]
    fn progress_line_shows_sentence_and_ambience() {
        let snapshot = SessionSnapshot {
            state: SessionState::Playing,
            is_playing: true,
            current_time: Duration::from_secs(12),
            total_time: Duration::from_secs(95),
            current_sentence_index: 1,
            unit_count: 5,
            source_kind: Some(SourceKind::SynthesizedSpeech),
            is_background_music_playing: true,
            ambience: AmbienceState {
                selected_track: Some(AmbienceTrack::GentleRain),
                is_playing: true,
                volume: 0.3,
            },
            ..SessionSnapshot::default()
        };
        assert_eq!(
            progress_line(&snapshot),
            "▶ 00:12 / 01:35  sentence 2/5  ♪ Gentle Rain"
        );
    }

    #[test]
    fn progress_line_for_prerendered_audio_has_no_sentence() {
        let snapshot = SessionSnapshot {
            state: SessionState::Paused,
            current_time: Duration::from_secs(90),
            total_time: Duration::from_secs(180),
            unit_count: 1,
            source_kind: Some(SourceKind::PrerenderedAudio),
            ..SessionSnapshot::default()
        };
        assert_eq!(progress_line(&snapshot), "⏸ 01:30 / 03:00");
    }

    #[test]
    fn cli_parses_narrate_arguments() {
        let cli = Cli::try_parse_from([
            "lullaby",
            "narrate",
            "--catalog",
            "stories.json",
            "--story",
            "story42",
            "--language",
            "es",
            "--ambience",
            "ocean-waves",
            "--volume",
            "0.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Narrate {
                story,
                language,
                ambience,
                ..
            } => {
                assert_eq!(story, "story42");
                assert_eq!(language, Language::Spanish);
                assert_eq!(ambience.ambience, Some(AmbienceTrack::OceanWaves));
                assert_eq!(ambience.volume, Some(0.5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test]
    async fn interrupt_abandons_pending_work() {
        let outcome = unless_interrupted(std::future::pending::<()>(), async {}).await;
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn work_finishing_first_returns_its_output() {
        let outcome = unless_interrupted(async { 7 }, std::future::pending::<()>()).await;
        assert_eq!(outcome, Some(7));
    }

    #[test]
    fn ambience_and_no_ambience_conflict() {
        let result = Cli::try_parse_from([
            "lullaby",
            "say",
            "hello",
            "--ambience",
            "music-box",
            "--no-ambience",
        ]);
        assert!(result.is_err());
    }
}
