//! Simulation constants and game-phase classification

use serde::{Deserialize, Serialize};

/// Starters per side
pub const ROSTER_SIZE: usize = 5;

/// Set score awarded to the full side when the opponent cannot field a lineup
pub const FORFEIT_SET_WINS: u8 = 2;

// Event firing
pub const MAX_FIRE_PROBABILITY: f64 = 0.8;
pub const EXPECTED_KILLS_PER_MINUTE: f64 = 0.9;
/// Kill-pace scaling only kicks in once a few minutes have been played
pub const KILL_PACE_GRACE_MINUTES: f64 = 3.0;

// Win chance
pub const COMEBACK_PER_KILL: f64 = 0.015;
pub const COMEBACK_CAP: f64 = 0.15;
pub const DEAD_PLAYER_SWING: f64 = 0.10;
pub const BARON_BUFF_SWING: f64 = 0.25;
pub const ELDER_BUFF_SWING: f64 = 0.35;
pub const MIN_WIN_CHANCE: f64 = 0.15;
pub const MAX_WIN_CHANCE: f64 = 0.85;

// Objective timers, in simulated seconds
pub const DRAGON_FIRST_SPAWN: u32 = 5 * 60;
pub const DRAGON_RESPAWN: u32 = 5 * 60;
pub const HERALD_SPAWN: u32 = 8 * 60;
pub const HERALD_DESPAWN: u32 = 20 * 60;
pub const BARON_FIRST_SPAWN: u32 = 20 * 60;
pub const BARON_RESPAWN: u32 = 6 * 60;
pub const ELDER_RESPAWN: u32 = 6 * 60;
pub const BUFF_DURATION: u32 = 180;
pub const DRAGONS_FOR_SOUL: usize = 4;

/// Chance that an exposed nexus actually falls on a tick that targets it
pub const NEXUS_KILL_CHANCE: f64 = 0.85;

// Per-set time budget range, in simulated seconds. Well past the length of a
// set that ends on a nexus, so the time limit only catches stalled sets.
pub const SET_BUDGET_MIN: u32 = 90 * 60;
pub const SET_BUDGET_MAX: u32 = 110 * 60;

// Economy
pub const STARTING_GOLD_PER_MEMBER: u32 = 500;
pub const PASSIVE_GOLD_PER_SECOND: u32 = 2;
pub const KILL_GOLD: u32 = 300;
pub const FIRST_BLOOD_GOLD: u32 = 400;
pub const ASSIST_GOLD: u32 = 150;
pub const DRAGON_GOLD: u32 = 250;
pub const HERALD_GOLD: u32 = 400;
pub const BARON_GOLD: u32 = 1500;
pub const ELDER_GOLD: u32 = 1250;
pub const TURRET_GOLD: u32 = 550;
pub const INHIBITOR_GOLD: u32 = 300;
pub const NEXUS_TURRET_GOLD: u32 = 250;

/// Champion level estimate used for respawn timers
pub fn estimated_level(clock_secs: u32) -> u32 {
    let minutes = clock_secs as f64 / 60.0;
    ((1.0 + minutes * 0.6).floor() as u32).min(18)
}

/// Seconds a slain actor stays out of play at this point of the game
pub fn respawn_seconds(clock_secs: u32) -> u32 {
    let level = estimated_level(clock_secs) as f64;
    (6.0 + (level - 1.0) * (54.0 / 17.0)).round() as u32
}

/// Game phase by elapsed minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Early,
    Mid,
    Late,
}

impl Phase {
    pub fn from_clock(clock_secs: u32) -> Self {
        match clock_secs / 60 {
            0..=14 => Phase::Early,
            15..=24 => Phase::Mid,
            _ => Phase::Late,
        }
    }

    pub fn base_probability(self) -> f64 {
        match self {
            Phase::Early => 0.25,
            Phase::Mid => 0.35,
            Phase::Late => 0.45,
        }
    }

    /// Baseline weight of the structure entry in the candidate table
    pub fn structure_weight(self) -> u32 {
        match self {
            Phase::Early => 1,
            Phase::Mid => 2,
            Phase::Late => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_boundaries() {
        assert_eq!(Phase::from_clock(0), Phase::Early);
        assert_eq!(Phase::from_clock(15 * 60 - 1), Phase::Early);
        assert_eq!(Phase::from_clock(15 * 60), Phase::Mid);
        assert_eq!(Phase::from_clock(25 * 60 - 1), Phase::Mid);
        assert_eq!(Phase::from_clock(25 * 60), Phase::Late);
    }

    #[test]
    fn respawn_grows_with_level_and_caps() {
        assert_eq!(estimated_level(0), 1);
        assert_eq!(respawn_seconds(0), 6);
        assert_eq!(estimated_level(10 * 60), 7);
        assert_eq!(estimated_level(90 * 60), 18);
        assert_eq!(respawn_seconds(90 * 60), 60);
        assert!(respawn_seconds(10 * 60) > respawn_seconds(60));
    }
}
