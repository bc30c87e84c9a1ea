//! Async front door to a [`NarrationSession`].
//!
//! [`Narrator::spawn`] moves a session onto its own tokio task. Commands
//! arrive over a channel, engine and timer events over another, and every
//! change is published as a [`SessionSnapshot`] on a watch channel. Content
//! preparation runs as a separate task; a newer preparation, a stop or a
//! teardown aborts it and its caller receives [`NarrationError::Cancelled`].
//!
//! ## Examples
//!
//! ```no_run
//! use lullaby::{
//!     AssetResolver, ContentPreparer, EventSink, Language, NarrationConfig,
//!     NarrationSession, Narrator, PrepareRequest, host,
//! };
//!
//! # async fn example() -> Result<(), lullaby::NarrationError> {
//! let config = NarrationConfig::default();
//! let resolver = AssetResolver::from_config(&config.assets);
//! let (sink, events) = EventSink::channel();
//! let platform = host::host_platform(sink, resolver.clone(), tokio::runtime::Handle::current());
//! let session = NarrationSession::new(&config, platform);
//! let preparer = ContentPreparer::new(resolver, config.speech.clone());
//!
//! let narrator = Narrator::spawn(session, preparer, events);
//! narrator
//!     .prepare_content(PrepareRequest::new("Once upon a time.", Language::English))
//!     .await?;
//! narrator.play().await?;
//! # Ok(())
//! # }
//! ```

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace};

use crate::errors::NarrationError;
use crate::preparer::ContentPreparer;
use crate::session::{NarrationSession, PreparationTicket};
use crate::traits::EngineEvent;
use crate::types::{AmbienceTrack, PrepareRequest, PreparedContent, SessionSnapshot};

type Reply = oneshot::Sender<Result<(), NarrationError>>;

#[derive(Debug)]
enum Command {
    Prepare { request: PrepareRequest, reply: Reply },
    SwitchLanguage { request: PrepareRequest, reply: Reply },
    Play { reply: Reply },
    Pause,
    Stop,
    Toggle { reply: Reply },
    SelectTrack { track: Option<AmbienceTrack>, reply: Reply },
    SetAmbienceVolume(f32),
    Teardown,
    Shutdown,
}

type Prepared = (PreparationTicket, Result<PreparedContent, NarrationError>);

/// The preparation currently in flight.
struct InFlight {
    ticket: PreparationTicket,
    reply: Reply,
    abort: AbortHandle,
}

impl InFlight {
    fn cancel(self) {
        self.abort.abort();
        let _ = self.reply.send(Err(NarrationError::Cancelled));
        debug!(ticket = self.ticket.generation(), "Preparation cancelled");
    }
}

/// Handle to a session running on its own task.
///
/// Dropping the handle shuts the task down and tears the session down.
#[derive(Debug)]
pub struct Narrator {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl Narrator {
    /// Move `session` onto a new task fed by `events`.
    ///
    /// `events` must be the receiver paired with the [`EventSink`](crate::EventSink)
    /// the session's engines and scheduler report to.
    pub fn spawn(
        session: NarrationSession,
        preparer: ContentPreparer,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(session.snapshot());
        let task = tokio::spawn(run(session, preparer, command_rx, events, snapshot_tx));
        Self {
            commands,
            snapshots,
            task,
        }
    }

    /// Prepare `request`, replacing whatever is loaded.
    ///
    /// Resolves when the session is `Ready`. Returns
    /// [`NarrationError::Cancelled`] if superseded first.
    pub async fn prepare_content(&self, request: PrepareRequest) -> Result<(), NarrationError> {
        self.request(|reply| Command::Prepare { request, reply }).await
    }

    /// Stop and prepare `request` in another language.
    pub async fn switch_language(&self, request: PrepareRequest) -> Result<(), NarrationError> {
        self.request(|reply| Command::SwitchLanguage { request, reply })
            .await
    }

    /// Start, restart or resume narration.
    pub async fn play(&self) -> Result<(), NarrationError> {
        self.request(|reply| Command::Play { reply }).await
    }

    /// Pause when playing, otherwise play.
    pub async fn toggle_play_pause(&self) -> Result<(), NarrationError> {
        self.request(|reply| Command::Toggle { reply }).await
    }

    /// Select an ambience track (`None` disables ambience).
    pub async fn select_track(&self, track: Option<AmbienceTrack>) -> Result<(), NarrationError> {
        self.request(|reply| Command::SelectTrack { track, reply })
            .await
    }

    /// Pause narration.
    pub fn pause(&self) -> Result<(), NarrationError> {
        self.send(Command::Pause)
    }

    /// Stop narration and cancel any preparation.
    pub fn stop(&self) -> Result<(), NarrationError> {
        self.send(Command::Stop)
    }

    /// Set the ambience volume.
    pub fn set_ambience_volume(&self, volume: f32) -> Result<(), NarrationError> {
        self.send(Command::SetAmbienceVolume(volume))
    }

    /// Stop and release the current source and ambience.
    pub fn teardown(&self) -> Result<(), NarrationError> {
        self.send(Command::Teardown)
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// A receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Tear the session down and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }

    fn send(&self, command: Command) -> Result<(), NarrationError> {
        self.commands
            .send(command)
            .map_err(|_| NarrationError::SessionClosed)
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), NarrationError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| NarrationError::SessionClosed)?
    }
}

async fn run(
    mut session: NarrationSession,
    preparer: ContentPreparer,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
) {
    let (prepared_tx, mut prepared_rx) = mpsc::unbounded_channel::<Prepared>();
    let mut in_flight: Option<InFlight> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if matches!(command, Command::Shutdown) {
                    break;
                }
                handle_command(&mut session, &preparer, &prepared_tx, &mut in_flight, command);
            }
            Some(event) = events.recv() => {
                trace!(?event, "Engine event");
                session.handle_event(event);
            }
            Some((ticket, result)) = prepared_rx.recv() => {
                let outcome = session.complete_preparation(ticket, result);
                match in_flight.take() {
                    Some(flight) if flight.ticket == ticket => {
                        let _ = flight.reply.send(outcome);
                    }
                    other => in_flight = other,
                }
            }
        }

        let next = session.snapshot();
        snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    if let Some(flight) = in_flight.take() {
        flight.cancel();
    }
    session.teardown();
    snapshots.send_replace(session.snapshot());
    info!("Narration task finished");
}

fn handle_command(
    session: &mut NarrationSession,
    preparer: &ContentPreparer,
    prepared_tx: &mpsc::UnboundedSender<Prepared>,
    in_flight: &mut Option<InFlight>,
    command: Command,
) {
    match command {
        Command::Prepare { request, reply } => {
            let ticket = session.begin_preparation(request.clone());
            start_preparation(preparer, prepared_tx, in_flight, ticket, request, reply);
        }
        Command::SwitchLanguage { request, reply } => {
            let ticket = session.switch_language(request.clone());
            start_preparation(preparer, prepared_tx, in_flight, ticket, request, reply);
        }
        Command::Play { reply } => {
            let _ = reply.send(session.play());
        }
        Command::Toggle { reply } => {
            let _ = reply.send(session.toggle_play_pause());
        }
        Command::Pause => session.pause(),
        Command::Stop => {
            if let Some(flight) = in_flight.take() {
                flight.cancel();
            }
            session.stop();
        }
        Command::SelectTrack { track, reply } => {
            let result = session
                .ambience_mut()
                .select_track(track)
                .map_err(|e| NarrationError::EngineFailure {
                    engine: "ambience",
                    message: e.to_string(),
                });
            let _ = reply.send(result);
        }
        Command::SetAmbienceVolume(volume) => session.ambience_mut().set_volume(volume),
        Command::Teardown => {
            if let Some(flight) = in_flight.take() {
                flight.cancel();
            }
            session.teardown();
        }
        Command::Shutdown => {}
    }
}

fn start_preparation(
    preparer: &ContentPreparer,
    prepared_tx: &mpsc::UnboundedSender<Prepared>,
    in_flight: &mut Option<InFlight>,
    ticket: PreparationTicket,
    request: PrepareRequest,
    reply: Reply,
) {
    if let Some(previous) = in_flight.take() {
        previous.cancel();
    }

    let preparer = preparer.clone();
    let tx = prepared_tx.clone();
    let handle = tokio::spawn(async move {
        let result = preparer.prepare(request).await;
        let _ = tx.send((ticket, result));
    });

    *in_flight = Some(InFlight {
        ticket,
        reply,
        abort: handle.abort_handle(),
    });
}
