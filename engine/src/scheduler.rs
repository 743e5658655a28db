//! The turn clock. Counts down once a second, recomputes its duration
//! from the players' preferences whenever the player set changes, and
//! tells the engine when a turn has to fire, either by deadline or
//! because everyone is ready.

use crate::config::GameConfig;
use crate::state::GameState;
use crate::visibility::ClockSnapshot;

pub struct TurnScheduler {
    /// Full duration of the current turn in seconds.
    turn_seconds: u64,
    /// Seconds left on the clock.
    remaining: u64,
    min_seconds: u64,
    max_seconds: u64,
    default_seconds: u64,
}

impl TurnScheduler {
    pub fn new(config: &GameConfig) -> TurnScheduler {
        let default = config.game.default_turn_duration.clamp(
            config.game.min_turn_duration,
            config.game.max_turn_duration,
        );
        TurnScheduler {
            turn_seconds: default,
            remaining: default,
            min_seconds: config.game.min_turn_duration,
            max_seconds: config.game.max_turn_duration,
            default_seconds: default,
        }
    }

    /// Recomputes the duration as the mean of the joined players' turn
    /// preferences, clamped to the configured bounds, and restarts the
    /// clock. Called at game start and on every player-set change.
    pub fn recompute_duration(&mut self, preference_minutes: &[u64]) {
        self.turn_seconds = if preference_minutes.is_empty() {
            self.default_seconds
        } else {
            let mean_minutes =
                preference_minutes.iter().sum::<u64>() / preference_minutes.len() as u64;
            (mean_minutes * 60).clamp(self.min_seconds, self.max_seconds)
        };
        self.remaining = self.turn_seconds;
    }

    /// One second passed. Returns true when the clock just ran out.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.remaining == 0
    }

    /// Readiness gate: every connected player flagged ready, and there
    /// is at least one of them.
    pub fn all_ready(state: &GameState) -> bool {
        let connected: Vec<_> = state.players.values().filter(|p| p.connected).collect();
        !connected.is_empty() && connected.iter().all(|p| p.ready)
    }

    /// Restarts the clock for the next turn.
    pub fn reset(&mut self) {
        self.remaining = self.turn_seconds;
    }

    pub fn time_remaining(&self) -> u64 {
        self.remaining
    }

    /// The clock values for timer frames and projections.
    pub fn clock_snapshot(&self, state: &GameState) -> ClockSnapshot {
        ClockSnapshot {
            time_remaining: self.remaining,
            players_ready: state.players.values().filter(|p| p.ready).count(),
            total_players: state.players.len(),
        }
    }
}
