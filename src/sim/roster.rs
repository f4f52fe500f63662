//! Roster, side and category types consumed from the team collaborators

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::tuning::{Phase, ROSTER_SIZE};

/// Which half of the scoreline a team occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opponent(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub const BOTH: [Side; 2] = [Side::A, Side::B];
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::A => write!(f, "A"),
            Side::B => write!(f, "B"),
        }
    }
}

/// Lane role of a roster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Top,
    Jungle,
    Mid,
    Adc,
    Support,
}

impl Role {
    /// Relative chance of being picked as the acting player in a fight
    pub fn combat_weight(self) -> u32 {
        match self {
            Role::Adc => 35,
            Role::Mid => 30,
            Role::Jungle => 20,
            Role::Top => 10,
            Role::Support => 5,
        }
    }
}

/// Match category, determines the best-of-N format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCategory {
    Regular,
    Playoff,
    Friendly,
}

impl MatchCategory {
    /// (max_sets, sets_to_win)
    pub fn format(self) -> (u8, u8) {
        match self {
            MatchCategory::Playoff => (5, 3),
            MatchCategory::Regular | MatchCategory::Friendly => (3, 2),
        }
    }
}

/// One starter as delivered by the roster directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterMember {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub power: f64,
}

/// Optional per-side tactical modifiers applied to roster power every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tactics {
    /// Flat multiplier on aggregate power
    pub aggression: f64,
    /// Fractional bonus while the game is in its early phase
    pub early_bonus: f64,
    /// Fractional bonus while the game is in its late phase
    pub late_bonus: f64,
}

impl Default for Tactics {
    fn default() -> Self {
        Self {
            aggression: 1.0,
            early_bonus: 0.0,
            late_bonus: 0.0,
        }
    }
}

impl Tactics {
    pub fn multiplier(&self, phase: Phase) -> f64 {
        let phase_bonus = match phase {
            Phase::Early => self.early_bonus,
            Phase::Mid => 0.0,
            Phase::Late => self.late_bonus,
        };
        (self.aggression * (1.0 + phase_bonus)).max(0.0)
    }

    pub fn validate(&self) -> Result<(), RosterError> {
        let values = [self.aggression, self.early_bonus, self.late_bonus];
        if values.iter().any(|v| !v.is_finite()) || self.aggression <= 0.0 {
            return Err(RosterError::InvalidTactics);
        }
        Ok(())
    }
}

/// A validated, ordered five-member lineup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    pub team_id: Uuid,
    pub members: Vec<RosterMember>,
    #[serde(default)]
    pub tactics: Tactics,
}

impl Roster {
    /// Build a roster from the team's ordered eligible starters.
    ///
    /// Only the first five starters take part. Callers check for short-handed
    /// teams before getting here; fewer than five is still rejected.
    pub fn from_starters(
        team_id: Uuid,
        starters: Vec<RosterMember>,
        tactics: Tactics,
    ) -> Result<Self, RosterError> {
        if starters.len() < ROSTER_SIZE {
            return Err(RosterError::ShortHanded {
                team_id,
                count: starters.len(),
            });
        }

        let members: Vec<RosterMember> = starters.into_iter().take(ROSTER_SIZE).collect();

        let mut seen = HashSet::new();
        for member in &members {
            if !seen.insert(member.id) {
                return Err(RosterError::DuplicateMember(member.id));
            }
            if member.name.trim().is_empty() {
                return Err(RosterError::MissingName(member.id));
            }
            if !member.power.is_finite() || member.power < 0.0 {
                return Err(RosterError::InvalidPower(member.id));
            }
        }

        tactics.validate()?;

        Ok(Self {
            team_id,
            members,
            tactics,
        })
    }

    pub fn total_power(&self) -> f64 {
        self.members.iter().map(|m| m.power).sum()
    }
}

/// Roster validation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RosterError {
    #[error("Team {team_id} has only {count} eligible starters")]
    ShortHanded { team_id: Uuid, count: usize },

    #[error("Member {0} appears twice in the lineup")]
    DuplicateMember(Uuid),

    #[error("Member {0} has no name")]
    MissingName(Uuid),

    #[error("Member {0} has a negative or non-finite power rating")]
    InvalidPower(Uuid),

    #[error("Tactical modifiers must be finite with a positive aggression")]
    InvalidTactics,

    #[error("Both sides field the same team")]
    SameTeam,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn member(name: &str, role: Role, power: f64) -> RosterMember {
        RosterMember {
            id: Uuid::new_v4(),
            name: name.to_string(),
            role,
            power,
        }
    }

    pub fn starters(prefix: &str, power: f64) -> Vec<RosterMember> {
        [Role::Top, Role::Jungle, Role::Mid, Role::Adc, Role::Support]
            .into_iter()
            .enumerate()
            .map(|(i, role)| member(&format!("{prefix}{i}"), role, power))
            .collect()
    }

    pub fn roster(prefix: &str, power: f64) -> Roster {
        Roster::from_starters(Uuid::new_v4(), starters(prefix, power), Tactics::default())
            .expect("fixture roster is valid")
    }
}
