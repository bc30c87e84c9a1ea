//! Looping ambience through `mpv` or `ffplay`.
//!
//! With `mpv` on unix hosts, pause, resume and volume changes go over mpv's
//! JSON IPC socket so the loop keeps its place and fades are audible. With
//! `ffplay` the volume is fixed when the player starts and pausing stops
//! the loop; resuming starts it again.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{AUDIO_PLAYERS, find_program, percent};
use crate::errors::EngineError;
use crate::resolve::AssetResolver;
use crate::traits::AmbiencePlayer;
use crate::types::AmbienceTrack;

/// Folder under the assets root that holds ambience tracks.
pub const AMBIENCE_FOLDER: &str = "ambience";

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Arguments for looping `file` forever at `volume`.
pub(crate) fn ambience_args(
    program: &str,
    file: &Path,
    volume: f32,
    ipc: Option<&Path>,
) -> Vec<String> {
    let volume = percent(volume).to_string();
    let mut args: Vec<String> = match program {
        "ffplay" => vec![
            "-nodisp".into(),
            "-loglevel".into(),
            "quiet".into(),
            "-loop".into(),
            "0".into(),
            "-volume".into(),
            volume,
        ],
        _ => vec![
            "--no-video".into(),
            "--no-terminal".into(),
            "--really-quiet".into(),
            "--loop-file=inf".into(),
            format!("--volume={volume}"),
        ],
    };
    if let Some(socket) = ipc {
        args.push(format!("--input-ipc-server={}", socket.display()));
    }
    args.push(file.to_string_lossy().into_owned());
    args
}

/// [`AmbiencePlayer`] backed by a host media player.
#[derive(Debug)]
pub struct HostAmbiencePlayer {
    program: &'static str,
    assets: AssetResolver,
    runtime: Handle,
    loaded: Option<PathBuf>,
    child: Option<Child>,
    volume: f32,
    paused: bool,
    ipc: Option<Ipc>,
}

impl HostAmbiencePlayer {
    /// Use the first installed player from [`AUDIO_PLAYERS`].
    pub fn detect(assets: AssetResolver, runtime: Handle) -> Result<Self, EngineError> {
        let program = find_program(&AUDIO_PLAYERS).ok_or(EngineError::Unavailable {
            kind: "audio player",
        })?;
        Ok(Self::with_program(program, assets, runtime))
    }

    /// Use a specific player binary.
    pub fn with_program(program: &'static str, assets: AssetResolver, runtime: Handle) -> Self {
        Self {
            program,
            assets,
            runtime,
            loaded: None,
            child: None,
            volume: 0.0,
            paused: false,
            ipc: None,
        }
    }

    /// The file that will loop, if a track is loaded.
    pub fn loaded(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    fn spawn(&mut self) -> Result<(), EngineError> {
        let Some(file) = self.loaded.clone() else {
            return Err(EngineError::NothingLoaded);
        };
        self.kill();

        let socket = self.supports_live_volume().then(|| {
            let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
            std::env::temp_dir().join(format!("lullaby-ambience-{}-{n}.sock", std::process::id()))
        });

        let mut command = Command::new(self.program);
        command
            .args(ambience_args(self.program, &file, self.volume, socket.as_deref()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let _guard = self.runtime.enter();
        let child = command.spawn().map_err(|source| EngineError::Spawn {
            program: self.program.to_string(),
            source,
        })?;
        self.child = Some(child);
        self.ipc = socket.map(|path| Ipc::connect(&self.runtime, path));
        trace!(program = self.program, file = %file.display(), "Ambience player started");
        Ok(())
    }

    fn kill(&mut self) {
        self.child = None;
        self.ipc = None;
    }
}

impl AmbiencePlayer for HostAmbiencePlayer {
    fn load(&mut self, track: AmbienceTrack) -> Result<(), EngineError> {
        let path = self
            .assets
            .resolve_shared(AMBIENCE_FOLDER, track.file_stem())
            .ok_or_else(|| EngineError::MissingResource {
                path: self
                    .assets
                    .root()
                    .join(AMBIENCE_FOLDER)
                    .join(track.file_stem()),
            })?;
        debug!(%track, path = %path.display(), "Ambience track found");
        self.loaded = Some(path);
        Ok(())
    }

    fn play_looping(&mut self, volume: f32) -> Result<(), EngineError> {
        self.volume = volume;
        self.paused = false;
        self.spawn()
    }

    fn pause(&mut self) {
        if self.child.is_none() || self.paused {
            return;
        }
        self.paused = true;
        match &self.ipc {
            Some(ipc) => ipc.send(r#"{"command":["set_property","pause",true]}"#),
            None => self.kill(),
        }
    }

    fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        match &self.ipc {
            Some(ipc) => ipc.send(r#"{"command":["set_property","pause",false]}"#),
            None => {
                if let Err(e) = self.spawn() {
                    debug!(error = %e, "Ambience could not restart");
                }
            }
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(ipc) = &self.ipc {
            let command = serde_json::json!({
                "command": ["set_property", "volume", percent(volume)]
            });
            ipc.send(&command.to_string());
        }
    }

    fn stop(&mut self) {
        self.kill();
        self.loaded = None;
        self.paused = false;
    }

    /// Only mpv over its unix socket takes volume changes mid-loop; ffplay
    /// keeps the volume it was spawned with.
    fn supports_live_volume(&self) -> bool {
        cfg!(unix) && self.program == "mpv"
    }
}

/// Ordered writer for one mpv IPC socket.
///
/// Commands sent before mpv has created the socket are dropped; the
/// volume given at spawn covers that window.
#[derive(Debug)]
struct Ipc {
    tx: mpsc::UnboundedSender<String>,
    path: PathBuf,
}

impl Ipc {
    #[cfg(unix)]
    fn connect(runtime: &Handle, path: PathBuf) -> Self {
        use tokio::io::AsyncWriteExt;
        use tokio::net::UnixStream;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let socket = path.clone();
        runtime.spawn(async move {
            let mut writer = None;
            while let Some(line) = rx.recv().await {
                if writer.is_none() {
                    match UnixStream::connect(&socket).await {
                        Ok(stream) => {
                            let (mut reader, write_half) = stream.into_split();
                            // mpv replies to every command; drain them.
                            tokio::spawn(async move {
                                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                            });
                            writer = Some(write_half);
                        }
                        Err(e) => {
                            trace!(error = %e, "mpv IPC socket not ready");
                            continue;
                        }
                    }
                }
                if let Some(stream) = writer.as_mut()
                    && stream.write_all(format!("{line}\n").as_bytes()).await.is_err()
                {
                    writer = None;
                }
            }
        });
        Self { tx, path }
    }

    #[cfg(not(unix))]
    fn connect(_runtime: &Handle, path: PathBuf) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx, path }
    }

    fn send(&self, command: &str) {
        let _ = self.tx.send(command.to_string());
    }
}

impl Drop for Ipc {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
