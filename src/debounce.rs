//! Trailing debounce over document change signals.
//!
//! The debouncer is a plain state machine driven by the caller's clock, so the
//! run loop decides how to wait and tests can step time explicitly.

use std::time::{Duration, Instant};

pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Armed { deadline: Instant },
    Firing,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Records a change signal. The deadline always moves to `now + window`,
    /// including while a previous trigger is still firing.
    pub fn signal(&mut self, now: Instant) {
        self.state = DebounceState::Armed {
            deadline: now + self.window,
        };
    }

    /// Arms with an explicit deadline unless a later one is already pending.
    pub fn arm_at(&mut self, deadline: Instant) {
        match self.state {
            DebounceState::Armed { deadline: current } if current >= deadline => {}
            _ => self.state = DebounceState::Armed { deadline },
        }
    }

    /// Returns `true` exactly once per quiet window that elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Armed { deadline } if now >= deadline => {
                self.state = DebounceState::Firing;
                true
            }
            _ => false,
        }
    }

    /// Marks the triggered scan as finished.
    pub fn complete(&mut self) {
        if self.state == DebounceState::Firing {
            self.state = DebounceState::Idle;
        }
    }

    /// How long the caller may block before the next `poll` can fire.
    pub fn time_until_deadline(&self, now: Instant) -> Option<Duration> {
        match self.state {
            DebounceState::Armed { deadline } => Some(deadline.saturating_duration_since(now)),
            DebounceState::Idle | DebounceState::Firing => None,
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_WINDOW)
    }
}
