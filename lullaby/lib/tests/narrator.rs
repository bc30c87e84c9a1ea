//! The async driver running a session on its own task.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{FakeAmbience, FakeAudio, FakeSpeech};
use lullaby::{
    AssetResolver, ContentPreparer, EngineError, EventSink, Language, ManualScheduler,
    MediaProbe, NarrationConfig, NarrationError, NarrationSession, Narrator, Platform,
    PrepareRequest, SessionSnapshot, SessionState,
};
use tokio::sync::watch;

/// Probe that takes a while, so preparation can be overtaken.
struct SlowProbe(Duration);

impl MediaProbe for SlowProbe {
    fn duration(&self, _path: &Path) -> Result<Duration, EngineError> {
        std::thread::sleep(self.0);
        Ok(Duration::from_secs(60))
    }
}

struct Everything;

impl lullaby::AssetLookup for Everything {
    fn is_file(&self, _path: &Path) -> bool {
        true
    }
}

/// A narrator whose speech engine finishes every sentence instantly.
fn narrator() -> (Narrator, FakeSpeech) {
    narrator_with_probe_delay(Duration::ZERO)
}

fn narrator_with_probe_delay(delay: Duration) -> (Narrator, FakeSpeech) {
    let config = NarrationConfig::default();
    let (sink, events) = EventSink::channel();
    let speech = FakeSpeech {
        echo: Some(sink),
        ..FakeSpeech::default()
    };
    let platform = Platform {
        speech: Box::new(speech.clone()),
        audio: Box::new(FakeAudio::default()),
        ambience: Box::new(FakeAmbience::default()),
        scheduler: Arc::new(ManualScheduler::new()),
    };
    let session = NarrationSession::new(&config, platform);
    let resolver = AssetResolver::new("/assets").with_lookup(Everything);
    let preparer = ContentPreparer::new(resolver, config.speech.clone()).with_probe(SlowProbe(delay));
    (Narrator::spawn(session, preparer, events), speech)
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
        .await
        .expect("state reached in time")
        .expect("narrator alive")
        .clone()
}

#[tokio::test]
async fn prepares_and_narrates_to_the_end() {
    let (narrator, speech) = narrator();
    let mut updates = narrator.subscribe();

    narrator
        .prepare_content(PrepareRequest::new("One. Two. Three.", Language::English))
        .await
        .unwrap();
    assert_eq!(narrator.snapshot().state, SessionState::Ready);
    assert_eq!(narrator.snapshot().unit_count, 3);

    narrator.play().await.unwrap();
    let done = wait_for(&mut updates, |s| {
        s.state == SessionState::Idle && speech.calls.lock().unwrap().len() == 3
    })
    .await;
    assert_eq!(done.current_sentence_index, 0);

    narrator.shutdown().await;
}

#[tokio::test]
async fn play_during_preparation_is_not_ready() {
    let (narrator, _speech) = narrator_with_probe_delay(Duration::from_millis(300));
    let request =
        PrepareRequest::new("One.", Language::English).with_audio_ref("story42_en.mp3");

    let (prepared, played) = tokio::join!(narrator.prepare_content(request), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        narrator.play().await
    });

    assert_eq!(played, Err(NarrationError::NotReady));
    prepared.unwrap();
    assert_eq!(narrator.snapshot().state, SessionState::Ready);
}

#[tokio::test]
async fn newer_preparation_cancels_the_older_one() {
    let (narrator, _speech) = narrator_with_probe_delay(Duration::from_millis(300));
    let first = PrepareRequest::new("First.", Language::English).with_audio_ref("first.mp3");
    let second = PrepareRequest::new("Segundo.", Language::Spanish);

    let (a, b) = tokio::join!(narrator.prepare_content(first), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        narrator.switch_language(second).await
    });

    assert_eq!(a, Err(NarrationError::Cancelled));
    b.unwrap();
    let snapshot = narrator.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.unit_count, 1);
}

#[tokio::test]
async fn stop_cancels_preparation() {
    let (narrator, _speech) = narrator_with_probe_delay(Duration::from_millis(300));
    let request = PrepareRequest::new("One.", Language::English).with_audio_ref("a.mp3");

    let (prepared, stopped) = tokio::join!(narrator.prepare_content(request), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        narrator.stop()
    });

    assert_eq!(prepared, Err(NarrationError::Cancelled));
    stopped.unwrap();
    assert_eq!(narrator.snapshot().state, SessionState::Idle);
}

#[tokio::test]
async fn ambience_commands_reach_the_session() {
    let (narrator, _speech) = narrator();
    narrator.set_ambience_volume(0.6).unwrap();
    narrator.select_track(None).await.unwrap();

    let snapshot = narrator.snapshot();
    assert_eq!(snapshot.ambience.volume, 0.6);
    assert_eq!(snapshot.ambience.selected_track, None);
}

#[tokio::test]
async fn shutdown_tears_the_session_down() {
    let (narrator, _speech) = narrator();
    narrator
        .prepare_content(PrepareRequest::new("One. Two.", Language::English))
        .await
        .unwrap();
    let updates = narrator.subscribe();
    assert_eq!(updates.borrow().unit_count, 2);

    narrator.shutdown().await;
    let last = updates.borrow().clone();
    assert_eq!(last.state, SessionState::Idle);
    assert_eq!(last.unit_count, 0);
    assert_eq!(last.source_kind, None);
}
