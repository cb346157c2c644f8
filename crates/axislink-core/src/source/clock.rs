use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::PlayerEvent;

#[derive(Debug)]
struct ClockState {
    playing: bool,
    /// Position at `anchor`, in seconds
    position: f64,
    anchor: Instant,
    speed: f64,
    duration: Option<f64>,
    file: Option<String>,
}

impl ClockState {
    fn position_at(&self, now: Instant) -> f64 {
        let mut position = self.position;
        if self.playing {
            position += now.saturating_duration_since(self.anchor).as_secs_f64() * self.speed;
        }
        match self.duration {
            Some(duration) => position.clamp(0.0, duration),
            None => position.max(0.0),
        }
    }

    /// Fold the time played so far into `position`.
    fn rebase(&mut self, now: Instant) {
        self.position = self.position_at(now);
        self.anchor = now;
    }
}

/// Playback position extrapolated from wall time between player reports.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    state: Arc<Mutex<ClockState>>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                playing: false,
                position: 0.0,
                anchor: Instant::now(),
                speed: 1.0,
                duration: None,
                file: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    /// Current position in seconds.
    pub fn position(&self) -> f64 {
        self.position_at(Instant::now())
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        self.lock().position_at(now)
    }

    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    pub fn duration(&self) -> Option<f64> {
        self.lock().duration
    }

    pub fn file(&self) -> Option<String> {
        self.lock().file.clone()
    }

    pub fn set_playing(&self, playing: bool) {
        let now = Instant::now();
        let mut state = self.lock();
        state.rebase(now);
        state.playing = playing;
    }

    pub fn seek(&self, position: f64) {
        if !position.is_finite() {
            return;
        }
        let mut state = self.lock();
        state.position = position.max(0.0);
        state.anchor = Instant::now();
    }

    pub fn set_speed(&self, speed: f64) {
        if !speed.is_finite() || speed < 0.0 {
            return;
        }
        let now = Instant::now();
        let mut state = self.lock();
        state.rebase(now);
        state.speed = speed;
    }

    pub fn set_duration(&self, duration: Option<f64>) {
        self.lock().duration = duration.filter(|d| d.is_finite() && *d > 0.0);
    }

    /// Switch files; the position restarts from zero.
    pub fn set_file(&self, file: Option<String>) {
        let mut state = self.lock();
        if state.file == file {
            return;
        }
        state.file = file;
        state.position = 0.0;
        state.anchor = Instant::now();
        state.duration = None;
    }

    pub fn apply(&self, event: &PlayerEvent) {
        match event {
            PlayerEvent::Playing(playing) => self.set_playing(*playing),
            PlayerEvent::Duration(duration) => self.set_duration(Some(*duration)),
            PlayerEvent::Position(position) => self.seek(*position),
            PlayerEvent::File(file) => self.set_file(file.clone()),
            PlayerEvent::Speed(speed) => self.set_speed(*speed),
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_paused_clock_holds_position() {
        let clock = PlaybackClock::new();
        clock.seek(12.5);
        let later = Instant::now() + Duration::from_secs(3);
        assert_eq!(clock.position_at(later), 12.5);
    }

    #[test]
    fn test_playing_clock_advances_with_speed() {
        let clock = PlaybackClock::new();
        clock.set_speed(2.0);
        clock.seek(10.0);
        clock.set_playing(true);

        let later = Instant::now() + Duration::from_secs(1);
        let position = clock.position_at(later);
        assert!((12.0..12.1).contains(&position), "position {}", position);
    }

    #[test]
    fn test_position_clamped_to_duration() {
        let clock = PlaybackClock::new();
        clock.set_duration(Some(5.0));
        clock.seek(4.5);
        clock.set_playing(true);
        assert_eq!(clock.position_at(Instant::now() + Duration::from_secs(10)), 5.0);
    }

    #[test]
    fn test_file_change_resets_position() {
        let clock = PlaybackClock::new();
        clock.apply(&PlayerEvent::File(Some("a.mp4".into())));
        clock.apply(&PlayerEvent::Position(30.0));
        clock.apply(&PlayerEvent::File(Some("a.mp4".into())));
        assert_eq!(clock.position(), 30.0);

        clock.apply(&PlayerEvent::File(Some("b.mp4".into())));
        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.file().as_deref(), Some("b.mp4"));
    }

    #[test]
    fn test_invalid_values_ignored() {
        let clock = PlaybackClock::new();
        clock.seek(f64::NAN);
        clock.set_speed(-1.0);
        clock.set_duration(Some(0.0));
        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.speed(), 1.0);
        assert_eq!(clock.duration(), None);
    }
}
