//! Simulated media player
//!
//! Stands in for a real video element: the position advances with tokio time
//! while playing, so paused-clock tests see deterministic positions.

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::sync::{MediaClock, PlaybackStatus};

struct PlayerState {
    paused: bool,
    /// Position at `anchor`
    position: f64,
    anchor: Instant,
}

impl PlayerState {
    fn position_at(&self, now: Instant) -> f64 {
        if self.paused {
            self.position
        } else {
            self.position + now.saturating_duration_since(self.anchor).as_secs_f64()
        }
    }
}

/// A media clock with no decoder behind it
pub struct SimulatedPlayer {
    state: Mutex<PlayerState>,
    /// Media duration in seconds; playback stops at the end when set
    duration: Option<f64>,
}

impl SimulatedPlayer {
    /// New player, paused at position zero
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PlayerState {
                paused: true,
                position: 0.0,
                anchor: Instant::now(),
            }),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn play(&self) {
        self.set_paused(false);
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn position(&self) -> f64 {
        self.status().current_time
    }

    fn clamp(&self, position: f64) -> f64 {
        let position = position.max(0.0);
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }
}

impl Default for SimulatedPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock for SimulatedPlayer {
    fn status(&self) -> PlaybackStatus {
        let state = self.state.lock();
        PlaybackStatus::new(state.paused, self.clamp(state.position_at(Instant::now())))
    }

    fn seek(&self, position: f64) {
        let mut state = self.state.lock();
        state.position = self.clamp(position);
        state.anchor = Instant::now();
    }

    fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        if state.paused == paused {
            return;
        }
        let now = Instant::now();
        state.position = self.clamp(state.position_at(now));
        state.anchor = now;
        state.paused = paused;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_position_advances_only_while_playing() {
        let player = SimulatedPlayer::new();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(player.position(), 0.0);

        player.play();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!((player.position() - 1.5).abs() < 1e-6);

        player.pause();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!((player.position() - 1.5).abs() < 1e-6);
        assert!(player.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_while_playing() {
        let player = SimulatedPlayer::new();
        player.play();
        player.seek(42.0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!((player.position() - 44.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clamped_to_duration() {
        let player = SimulatedPlayer::new().with_duration(5.0);
        player.seek(-3.0);
        assert_eq!(player.position(), 0.0);

        player.play();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(player.position(), 5.0);
    }
}
