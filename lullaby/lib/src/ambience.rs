//! Background ambience coordination.
//!
//! The coordinator owns one [`AmbiencePlayer`] and keeps at most one track
//! looping. Output volume is `user volume * fade gain`: fades ramp the gain
//! on a timer while the user volume can change at any moment without
//! disturbing the ramp.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::{Scheduler, TimerId};
use crate::config::AmbienceConfig;
use crate::errors::EngineError;
use crate::traits::AmbiencePlayer;
use crate::types::{AmbienceState, AmbienceTrack};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fade {
    from: f32,
    to: f32,
    elapsed: Duration,
    length: Duration,
}

impl Fade {
    fn gain(&self) -> f32 {
        if self.length.is_zero() {
            return self.to;
        }
        let progress = (self.elapsed.as_secs_f32() / self.length.as_secs_f32()).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * progress
    }

    fn is_done(&self) -> bool {
        self.elapsed >= self.length
    }

    fn is_fade_out(&self) -> bool {
        self.to < self.from
    }
}

/// Keeps one ambience track looping under narration.
pub struct AmbienceCoordinator {
    player: Box<dyn AmbiencePlayer>,
    scheduler: Arc<dyn Scheduler>,
    config: AmbienceConfig,
    selected: Option<AmbienceTrack>,
    loaded: Option<AmbienceTrack>,
    /// Track currently audible, including a fading-out tail.
    current: Option<AmbienceTrack>,
    phase: Phase,
    volume: f32,
    gain: f32,
    fade: Option<Fade>,
    fade_timer: Option<TimerId>,
    /// A track was switched while paused; start it on the next resume.
    start_on_resume: bool,
}

impl fmt::Debug for AmbienceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbienceCoordinator")
            .field("selected", &self.selected)
            .field("loaded", &self.loaded)
            .field("current", &self.current)
            .field("phase", &self.phase)
            .field("volume", &self.volume)
            .field("gain", &self.gain)
            .field("fade", &self.fade)
            .finish_non_exhaustive()
    }
}

impl AmbienceCoordinator {
    /// Create a coordinator with the configured default track selected.
    pub fn new(
        player: Box<dyn AmbiencePlayer>,
        scheduler: Arc<dyn Scheduler>,
        config: AmbienceConfig,
    ) -> Self {
        Self {
            player,
            scheduler,
            selected: config.default_track,
            volume: config.volume.clamp(0.0, 1.0),
            config,
            loaded: None,
            current: None,
            phase: Phase::Stopped,
            gain: 0.0,
            fade: None,
            fade_timer: None,
            start_on_resume: false,
        }
    }

    /// Observable state.
    pub fn state(&self) -> AmbienceState {
        AmbienceState {
            selected_track: self.selected,
            is_playing: self.is_playing(),
            volume: self.volume,
        }
    }

    /// Whether a track is looping (paused and fading-out tails do not count).
    pub fn is_playing(&self) -> bool {
        self.phase == Phase::Playing
    }

    /// Whether a track is paused, or waiting to start on resume.
    pub fn is_paused(&self) -> bool {
        self.phase == Phase::Paused || self.start_on_resume
    }

    /// The selected track.
    pub fn selected_track(&self) -> Option<AmbienceTrack> {
        self.selected
    }

    /// User volume.
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Volume actually sent to the player.
    pub fn effective_volume(&self) -> f32 {
        self.volume * self.gain
    }

    /// Preload the selected track without playing it.
    ///
    /// Failures are logged; narration goes on without ambience.
    pub fn prepare_default(&mut self) {
        let Some(track) = self.selected else {
            return;
        };
        if self.phase != Phase::Stopped || self.current.is_some() {
            return;
        }
        if let Err(e) = self.ensure_loaded(track) {
            warn!(%track, error = %e, "Failed to preload ambience");
        }
    }

    /// Start the selected track with a fade-in. No-op when nothing is
    /// selected or a track is already playing; resumes a paused track.
    pub fn start(&mut self) -> Result<(), EngineError> {
        match self.phase {
            Phase::Playing => Ok(()),
            Phase::Paused => {
                self.resume();
                Ok(())
            }
            Phase::Stopped => match self.selected {
                Some(track) => self.play(track, true),
                None => Ok(()),
            },
        }
    }

    /// Select `track` and start it looping, optionally fading in.
    ///
    /// Anything already audible, including a fading-out tail, is halted
    /// first. A player without live volume control starts at full volume
    /// instead of fading.
    pub fn play(&mut self, track: AmbienceTrack, fade_in: bool) -> Result<(), EngineError> {
        self.selected = Some(track);
        self.halt();
        self.ensure_loaded(track)?;

        let fade_in = fade_in && self.player.supports_live_volume();

        self.gain = if fade_in { 0.0 } else { 1.0 };
        if let Err(e) = self.player.play_looping(self.effective_volume()) {
            self.loaded = None;
            return Err(e);
        }
        self.current = Some(track);
        self.phase = Phase::Playing;
        info!(%track, fade_in, volume = self.volume, "Ambience started");

        if fade_in {
            self.begin_fade(1.0, self.config.fade_in());
        }
        Ok(())
    }

    /// Pause the loop. An in-progress fade is frozen, not restarted.
    pub fn pause(&mut self) {
        if self.phase != Phase::Playing {
            return;
        }
        self.cancel_fade_timer();
        self.player.pause();
        self.phase = Phase::Paused;
        debug!("Ambience paused");
    }

    /// Continue a paused loop and any frozen fade.
    ///
    /// A track selected while paused starts now, with a fade-in.
    pub fn resume(&mut self) {
        if std::mem::take(&mut self.start_on_resume) {
            if let Some(track) = self.selected {
                if let Err(e) = self.play(track, true) {
                    warn!(%track, error = %e, "Ambience failed to start on resume");
                }
            }
            return;
        }
        if self.phase != Phase::Paused {
            return;
        }
        self.player.resume();
        self.phase = Phase::Playing;
        if self.fade.is_some() {
            self.schedule_fade_timer();
        }
        debug!("Ambience resumed");
    }

    /// Stop the loop.
    ///
    /// With `fade_out` the track ramps to silence before being halted and
    /// released; either way [`is_playing`](Self::is_playing) is `false` on
    /// return.
    pub fn stop(&mut self, fade_out: bool) {
        self.start_on_resume = false;
        if self.current.is_none() {
            return;
        }
        let was_paused = self.phase == Phase::Paused;
        self.phase = Phase::Stopped;

        if fade_out && !was_paused && self.gain > 0.0 {
            self.begin_fade(0.0, self.config.fade_out());
            info!("Ambience fading out");
        } else {
            self.halt();
            info!("Ambience stopped");
        }
    }

    /// Stop immediately and forget the preloaded track.
    pub fn release(&mut self) {
        self.halt();
        if self.loaded.take().is_some() {
            self.player.stop();
        }
    }

    /// Set the user volume, clamped to `[0, 1]`. Applies immediately.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        if self.current.is_some() {
            self.player.set_volume(self.effective_volume());
        }
        debug!(volume = self.volume, "Ambience volume changed");
    }

    /// Change the selected track.
    ///
    /// While a track is playing, the old one stops without a fade and the
    /// new one starts with a fade (or stops entirely for `None`). While
    /// paused, the new track is only loaded and starts on
    /// [`resume`](Self::resume).
    pub fn select_track(&mut self, track: Option<AmbienceTrack>) -> Result<(), EngineError> {
        if track == self.selected {
            return Ok(());
        }
        let paused = self.is_paused();
        let active = self.phase != Phase::Stopped || paused;
        self.selected = track;
        if !active {
            if self.loaded.is_some() && self.loaded != track && self.current.is_none() {
                self.loaded = None;
                self.player.stop();
            }
            return Ok(());
        }

        self.halt();
        match track {
            Some(track) if paused => {
                self.ensure_loaded(track)?;
                self.start_on_resume = true;
                debug!(%track, "Ambience switched while paused");
                Ok(())
            }
            Some(track) => self.play(track, true),
            None => Ok(()),
        }
    }

    /// Handle a timer tick. Returns `false` if the timer is not ours.
    pub fn on_timer(&mut self, timer: TimerId) -> bool {
        if self.fade_timer != Some(timer) {
            return false;
        }
        let Some(mut fade) = self.fade else {
            self.cancel_fade_timer();
            return true;
        };

        fade.elapsed = fade.elapsed.saturating_add(self.config.fade_step());
        self.gain = fade.gain();
        self.player.set_volume(self.effective_volume());

        if fade.is_done() {
            self.fade = None;
            self.cancel_fade_timer();
            if fade.is_fade_out() {
                self.halt();
                debug!("Ambience fade-out finished");
            }
        } else {
            self.fade = Some(fade);
        }
        true
    }

    fn ensure_loaded(&mut self, track: AmbienceTrack) -> Result<(), EngineError> {
        if self.loaded == Some(track) {
            return Ok(());
        }
        self.player.load(track)?;
        self.loaded = Some(track);
        debug!(%track, "Ambience loaded");
        Ok(())
    }

    fn begin_fade(&mut self, to: f32, length: Duration) {
        self.cancel_fade_timer();
        if length.is_zero() {
            self.fade = None;
            self.gain = to;
            self.player.set_volume(self.effective_volume());
            if to == 0.0 {
                self.halt();
            }
            return;
        }
        self.fade = Some(Fade {
            from: self.gain,
            to,
            elapsed: Duration::ZERO,
            length,
        });
        self.schedule_fade_timer();
    }

    fn schedule_fade_timer(&mut self) {
        if self.fade_timer.is_none() {
            self.fade_timer = Some(self.scheduler.schedule_repeating(self.config.fade_step()));
        }
    }

    fn cancel_fade_timer(&mut self) {
        if let Some(timer) = self.fade_timer.take() {
            self.scheduler.cancel(timer);
        }
    }

    /// Silence and release whatever is audible right now.
    fn halt(&mut self) {
        self.cancel_fade_timer();
        self.fade = None;
        self.start_on_resume = false;
        if self.current.take().is_some() {
            self.player.stop();
            self.loaded = None;
        }
        self.phase = Phase::Stopped;
        self.gain = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::clock::ManualScheduler;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Load(AmbienceTrack),
        Play(f32),
        Pause,
        Resume,
        Volume(f32),
        Stop,
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Call>>>);

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }

        fn last_volume(&self) -> Option<f32> {
            self.calls().into_iter().rev().find_map(|c| match c {
                Call::Volume(v) | Call::Play(v) => Some(v),
                _ => None,
            })
        }
    }

    impl AmbiencePlayer for Recorder {
        fn load(&mut self, track: AmbienceTrack) -> Result<(), EngineError> {
            self.0.lock().unwrap().push(Call::Load(track));
            Ok(())
        }
        fn play_looping(&mut self, volume: f32) -> Result<(), EngineError> {
            self.0.lock().unwrap().push(Call::Play(volume));
            Ok(())
        }
        fn pause(&mut self) {
            self.0.lock().unwrap().push(Call::Pause);
        }
        fn resume(&mut self) {
            self.0.lock().unwrap().push(Call::Resume);
        }
        fn set_volume(&mut self, volume: f32) {
            self.0.lock().unwrap().push(Call::Volume(volume));
        }
        fn stop(&mut self) {
            self.0.lock().unwrap().push(Call::Stop);
        }
    }

    fn coordinator() -> (Recorder, Arc<ManualScheduler>, AmbienceCoordinator) {
        let recorder = Recorder::default();
        let scheduler = Arc::new(ManualScheduler::new());
        let config = AmbienceConfig {
            default_track: Some(AmbienceTrack::GentleRain),
            volume: 0.5,
            fade_in_ms: 200,
            fade_out_ms: 100,
            fade_step_ms: 50,
        };
        let coordinator =
            AmbienceCoordinator::new(Box::new(recorder.clone()), scheduler.clone(), config);
        (recorder, scheduler, coordinator)
    }

    fn assert_volume(recorder: &Recorder, expected: f32) {
        let actual = recorder.last_volume().expect("no volume sent");
        assert!(
            (actual - expected).abs() < 1e-4,
            "expected volume {expected}, got {actual}"
        );
    }

    fn fire_fade(scheduler: &ManualScheduler, coordinator: &mut AmbienceCoordinator) {
        let (timer, _) = scheduler.active()[0];
        assert!(coordinator.on_timer(timer));
    }

    #[test]
    fn prepare_default_loads_without_playing() {
        let (recorder, _, mut ambience) = coordinator();
        ambience.prepare_default();
        ambience.prepare_default();
        assert_eq!(recorder.calls(), vec![Call::Load(AmbienceTrack::GentleRain)]);
        assert!(!ambience.is_playing());
    }

    #[test]
    fn start_fades_in_to_user_volume() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.start().unwrap();
        assert!(ambience.is_playing());
        assert_eq!(recorder.last_volume(), Some(0.0));

        for _ in 0..4 {
            fire_fade(&scheduler, &mut ambience);
        }
        assert_volume(&recorder, 0.5);
        assert!(scheduler.active().is_empty());
    }

    #[test]
    fn volume_change_mid_fade_keeps_the_ramp() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.start().unwrap();
        fire_fade(&scheduler, &mut ambience); // gain 0.25
        ambience.set_volume(1.0);
        assert_volume(&recorder, 0.25);
        fire_fade(&scheduler, &mut ambience); // gain 0.5
        assert_volume(&recorder, 0.5);
    }

    #[test]
    fn pause_freezes_fade_and_resume_continues_it() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.start().unwrap();
        fire_fade(&scheduler, &mut ambience);
        ambience.pause();
        assert!(scheduler.active().is_empty());
        assert!(!ambience.is_playing());

        ambience.resume();
        assert!(ambience.is_playing());
        fire_fade(&scheduler, &mut ambience);
        assert_volume(&recorder, 0.25);
        let plays = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Play(_)))
            .count();
        assert_eq!(plays, 1);
    }

    #[test]
    fn stop_with_fade_out_reports_stopped_immediately() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.play(AmbienceTrack::OceanWaves, false).unwrap();
        ambience.stop(true);
        assert!(!ambience.is_playing());
        assert!(!recorder.calls().contains(&Call::Stop));

        fire_fade(&scheduler, &mut ambience);
        fire_fade(&scheduler, &mut ambience);
        assert_eq!(recorder.calls().last(), Some(&Call::Stop));
        assert!(scheduler.active().is_empty());
    }

    #[test]
    fn stop_without_fade_halts_at_once() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.start().unwrap();
        ambience.stop(false);
        assert_eq!(recorder.calls().last(), Some(&Call::Stop));
        assert!(scheduler.active().is_empty());
        ambience.stop(false);
        let stops = recorder.calls().iter().filter(|c| **c == Call::Stop).count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn restart_during_fade_out_cuts_the_tail() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.play(AmbienceTrack::OceanWaves, false).unwrap();
        ambience.stop(true);
        ambience.start().unwrap();
        assert!(ambience.is_playing());
        assert!(recorder.calls().contains(&Call::Stop));
        assert_eq!(scheduler.active().len(), 1);
    }

    #[test]
    fn switching_tracks_while_playing_restarts_with_fade() {
        let (recorder, _, mut ambience) = coordinator();
        ambience.play(AmbienceTrack::OceanWaves, false).unwrap();
        ambience.select_track(Some(AmbienceTrack::WhiteNoise)).unwrap();

        let calls = recorder.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[
                Call::Stop,
                Call::Load(AmbienceTrack::WhiteNoise),
                Call::Play(0.0)
            ]
        );
        assert_eq!(ambience.selected_track(), Some(AmbienceTrack::WhiteNoise));
    }

    #[test]
    fn switching_tracks_while_paused_waits_for_resume() {
        let (recorder, scheduler, mut ambience) = coordinator();
        ambience.start().unwrap();
        fire_fade(&scheduler, &mut ambience);
        ambience.pause();

        ambience.select_track(Some(AmbienceTrack::WhiteNoise)).unwrap();
        assert!(!ambience.is_playing());
        assert!(ambience.is_paused());
        assert!(scheduler.active().is_empty());
        let calls = recorder.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::Stop, Call::Load(AmbienceTrack::WhiteNoise)]
        );

        ambience.resume();
        assert!(ambience.is_playing());
        assert_eq!(recorder.calls().last(), Some(&Call::Play(0.0)));
        assert_eq!(scheduler.active().len(), 1);
    }

    #[test]
    fn stop_forgets_a_track_switched_while_paused() {
        let (recorder, _, mut ambience) = coordinator();
        ambience.start().unwrap();
        ambience.pause();
        ambience.select_track(Some(AmbienceTrack::WhiteNoise)).unwrap();
        ambience.stop(false);

        ambience.resume();
        assert!(!ambience.is_playing());
        let plays = recorder
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Play(_)))
            .count();
        assert_eq!(plays, 1);
    }

    /// A player that only takes its volume at start.
    #[derive(Clone, Default)]
    struct SpawnVolume(Recorder);

    impl AmbiencePlayer for SpawnVolume {
        fn load(&mut self, track: AmbienceTrack) -> Result<(), EngineError> {
            self.0.load(track)
        }
        fn play_looping(&mut self, volume: f32) -> Result<(), EngineError> {
            self.0.play_looping(volume)
        }
        fn pause(&mut self) {
            self.0.pause();
        }
        fn resume(&mut self) {
            self.0.resume();
        }
        fn set_volume(&mut self, volume: f32) {
            self.0.set_volume(volume);
        }
        fn stop(&mut self) {
            self.0.stop();
        }
        fn supports_live_volume(&self) -> bool {
            false
        }
    }

    #[test]
    fn player_without_live_volume_starts_at_full_volume() {
        let player = SpawnVolume::default();
        let recorder = player.0.clone();
        let scheduler = Arc::new(ManualScheduler::new());
        let config = AmbienceConfig {
            default_track: Some(AmbienceTrack::GentleRain),
            volume: 0.5,
            fade_in_ms: 200,
            fade_out_ms: 100,
            fade_step_ms: 50,
        };
        let mut ambience = AmbienceCoordinator::new(Box::new(player), scheduler.clone(), config);

        ambience.start().unwrap();
        assert!(ambience.is_playing());
        assert_eq!(recorder.calls().last(), Some(&Call::Play(0.5)));
        assert!(scheduler.active().is_empty());
        assert_eq!(ambience.effective_volume(), 0.5);
    }

    #[test]
    fn switching_tracks_while_idle_only_records() {
        let (recorder, _, mut ambience) = coordinator();
        ambience.select_track(Some(AmbienceTrack::ForestNight)).unwrap();
        assert!(recorder.calls().is_empty());
        ambience.prepare_default();
        assert_eq!(recorder.calls(), vec![Call::Load(AmbienceTrack::ForestNight)]);
    }

    #[test]
    fn no_selected_track_means_no_ambience() {
        let (recorder, _, mut ambience) = coordinator();
        ambience.select_track(None).unwrap();
        ambience.prepare_default();
        ambience.start().unwrap();
        assert!(recorder.calls().is_empty());
        assert!(!ambience.is_playing());
    }

    #[test]
    fn volume_is_clamped() {
        let (_, _, mut ambience) = coordinator();
        ambience.set_volume(3.0);
        assert_eq!(ambience.volume(), 1.0);
        ambience.set_volume(-1.0);
        assert_eq!(ambience.volume(), 0.0);
    }

    #[test]
    fn foreign_timer_is_not_consumed() {
        let (_, _, mut ambience) = coordinator();
        assert!(!ambience.on_timer(TimerId(999)));
    }
}
