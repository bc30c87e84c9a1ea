//! Sentence-by-sentence speech through `say` or eSpeak.
//!
//! One process per sentence. The text goes in on stdin so sentences that
//! start with `-` are never read as flags. Neither program can pause
//! mid-sentence, so pausing kills the process and resuming speaks the
//! whole sentence again.

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, trace};

use super::{ChildTask, find_program};
use crate::errors::EngineError;
use crate::traits::{EventSink, SpeechEngine};
use crate::types::{Language, Utterance};

/// Speaking rate of both programs at `rate == 1.0`, in words per minute.
const DEFAULT_RATE_WPM: f32 = 175.0;

/// A host speech program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechProgram {
    /// macOS `say`.
    Say,
    /// `espeak-ng` or `espeak`, by binary name.
    ESpeak(&'static str),
}

impl SpeechProgram {
    /// The best program installed on this host.
    pub fn detect() -> Option<Self> {
        if cfg!(target_os = "macos") && find_program(&["say"]).is_some() {
            return Some(SpeechProgram::Say);
        }
        find_program(&["espeak-ng", "espeak"]).map(SpeechProgram::ESpeak)
    }

    /// Binary name.
    pub fn binary(self) -> &'static str {
        match self {
            SpeechProgram::Say => "say",
            SpeechProgram::ESpeak(binary) => binary,
        }
    }

    /// Arguments for speaking `utterance`; the text itself goes on stdin.
    pub fn args(self, utterance: &Utterance) -> Vec<String> {
        let wpm = (DEFAULT_RATE_WPM * utterance.rate.max(0.1)).round() as u32;
        let mut args = Vec::new();
        match self {
            SpeechProgram::Say => {
                let voice = utterance
                    .voice
                    .clone()
                    .or_else(|| say_voice(utterance.language).map(str::to_string));
                if let Some(voice) = voice {
                    args.push("-v".to_string());
                    args.push(voice);
                }
                args.push("-r".to_string());
                args.push(wpm.to_string());
            }
            SpeechProgram::ESpeak(_) => {
                let voice = utterance
                    .voice
                    .clone()
                    .unwrap_or_else(|| utterance.language.code().to_string());
                args.push("-v".to_string());
                args.push(voice);
                args.push("-s".to_string());
                args.push(wpm.to_string());
            }
        }
        args
    }

    fn command(self, utterance: &Utterance) -> Command {
        let mut command = Command::new(self.binary());
        command
            .args(self.args(utterance))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// `say` voice used when none is configured.
fn say_voice(language: Language) -> Option<&'static str> {
    match language {
        Language::English => None,
        Language::Spanish => Some("Mónica"),
    }
}

/// [`SpeechEngine`] backed by a host speech program.
#[derive(Debug)]
pub struct HostSpeechEngine {
    program: SpeechProgram,
    sink: EventSink,
    runtime: Handle,
    current: Option<Utterance>,
    task: Option<ChildTask>,
    paused: bool,
}

impl HostSpeechEngine {
    /// Use the best installed program.
    pub fn detect(sink: EventSink, runtime: Handle) -> Result<Self, EngineError> {
        let program = SpeechProgram::detect().ok_or(EngineError::Unavailable { kind: "speech" })?;
        debug!(program = program.binary(), "Using host speech program");
        Ok(Self::with_program(program, sink, runtime))
    }

    /// Use a specific program.
    pub fn with_program(program: SpeechProgram, sink: EventSink, runtime: Handle) -> Self {
        Self {
            program,
            sink,
            runtime,
            current: None,
            task: None,
            paused: false,
        }
    }

    /// The program in use.
    pub fn program(&self) -> SpeechProgram {
        self.program
    }

    fn spawn(&self, utterance: Utterance) -> ChildTask {
        let mut command = self.program.command(&utterance);
        let program = self.program.binary();
        let sink = self.sink.clone();

        ChildTask(self.runtime.spawn(async move {
            let unit = utterance.unit;
            if !utterance.lead_in.is_zero() {
                tokio::time::sleep(utterance.lead_in).await;
            }

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    let err = EngineError::Spawn {
                        program: program.to_string(),
                        source,
                    };
                    sink.unit_failed(unit, err.to_string());
                    return;
                }
            };
            sink.unit_started(unit);

            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(utterance.text.as_bytes()).await {
                    sink.unit_failed(unit, format!("failed to write to {program}: {e}"));
                    return;
                }
                // EOF starts the speech
                drop(stdin);
            }

            match child.wait_with_output().await {
                Ok(output) if output.status.success() => {
                    if !utterance.trailing_pause.is_zero() {
                        tokio::time::sleep(utterance.trailing_pause).await;
                    }
                    sink.unit_completed(unit);
                }
                Ok(output) => {
                    let err = EngineError::ProcessFailed {
                        program: program.to_string(),
                        status: output.status.code(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    };
                    sink.unit_failed(unit, err.to_string());
                }
                Err(e) => sink.unit_failed(unit, e.to_string()),
            }
        }))
    }
}

impl SpeechEngine for HostSpeechEngine {
    fn speak(&mut self, utterance: Utterance) -> Result<(), EngineError> {
        self.task = None;
        self.paused = false;
        trace!(unit = ?utterance.unit, program = self.program.binary(), "Speaking sentence");
        self.task = Some(self.spawn(utterance.clone()));
        self.current = Some(utterance);
        Ok(())
    }

    fn pause(&mut self) {
        if self.task.take().is_some() {
            self.paused = true;
        }
    }

    fn resume(&mut self) {
        if !std::mem::take(&mut self.paused) {
            return;
        }
        if let Some(utterance) = self.current.clone() {
            let utterance = Utterance {
                lead_in: std::time::Duration::ZERO,
                ..utterance
            };
            self.task = Some(self.spawn(utterance));
        }
    }

    fn stop(&mut self) {
        self.task = None;
        self.current = None;
        self.paused = false;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::UnitId;

    fn utterance(language: Language, rate: f32, voice: Option<&str>) -> Utterance {
        Utterance {
            unit: UnitId { epoch: 1, index: 0 },
            text: "Goodnight moon.".into(),
            language,
            rate,
            voice: voice.map(str::to_string),
            lead_in: Duration::ZERO,
            trailing_pause: Duration::ZERO,
        }
    }

    #[test]
    fn say_uses_rate_in_words_per_minute() {
        let args = SpeechProgram::Say.args(&utterance(Language::English, 0.85, None));
        assert_eq!(args, vec!["-r", "149"]);
    }

    #[test]
    fn say_picks_a_spanish_voice_when_none_is_configured() {
        let args = SpeechProgram::Say.args(&utterance(Language::Spanish, 1.0, None));
        assert_eq!(args, vec!["-v", "Mónica", "-r", "175"]);
    }

    #[test]
    fn espeak_uses_language_code_as_voice() {
        let args = SpeechProgram::ESpeak("espeak-ng").args(&utterance(Language::Spanish, 0.8, None));
        assert_eq!(args, vec!["-v", "es", "-s", "140"]);
    }

    #[test]
    fn configured_voice_wins() {
        let args =
            SpeechProgram::ESpeak("espeak").args(&utterance(Language::English, 1.0, Some("en+f3")));
        assert_eq!(args[..2], ["-v", "en+f3"]);
    }

    #[tokio::test]
    async fn missing_program_reports_unit_failure() {
        let (sink, mut rx) = EventSink::channel();
        let mut engine = HostSpeechEngine::with_program(
            SpeechProgram::ESpeak("lullaby-no-such-speech-program"),
            sink,
            Handle::current(),
        );
        let spoken = utterance(Language::English, 1.0, None);
        engine.speak(spoken.clone()).unwrap();

        match rx.recv().await {
            Some(crate::EngineEvent::UnitFailed { unit, message }) => {
                assert_eq!(unit, spoken.unit);
                assert!(message.contains("lullaby-no-such-speech-program"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
