//! Weighted candidate table for the per-tick event draw
//!
//! Each entry is a tagged variant with a weight; preconditions are checked
//! while the table is built so the draw itself is a plain weighted pick.

use super::events::EventKind;
use super::roster::Side;
use super::state::MatchState;
use super::tuning::Phase;

/// What the generator may try to resolve this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Combat(EventKind),
    Dragon,
    Herald,
    Baron,
    Elder,
    Structure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub candidate: Candidate,
    pub weight: u32,
}

/// Eligible candidates for one contested moment
#[derive(Debug, Clone, Default)]
pub struct CandidateTable {
    entries: Vec<Entry>,
}

impl CandidateTable {
    /// Assemble the table for `acting`, the side that won the contested moment
    pub fn build(state: &MatchState, acting: Side) -> Self {
        let mut table = Self::default();
        let phase = Phase::from_clock(state.clock());

        let both_sides_alive = Side::BOTH
            .iter()
            .all(|side| !state.alive_members(*side).is_empty());
        if both_sides_alive {
            let opener = if state.total_kills() == 0 {
                EventKind::FirstBlood
            } else {
                EventKind::Kill
            };
            for &(kind, weight) in combat_weights(phase) {
                let kind = if kind == EventKind::Kill { opener } else { kind };
                table.push(Candidate::Combat(kind), weight);
            }
        }

        // Objectives and pushes need somebody standing on the acting side
        if state.alive_members(acting).is_empty() {
            return table;
        }

        let objectives = state.objectives();
        if state.dragon_up() {
            table.push(Candidate::Dragon, 1);
        }
        if objectives.herald_alive && !objectives.herald_taken {
            table.push(Candidate::Herald, 1);
        }
        if objectives.baron_alive {
            table.push(Candidate::Baron, 1);
        }
        if objectives.elder_available && objectives.elder_alive {
            table.push(Candidate::Elder, 1);
        }

        let enemy = state.team(acting.opponent());
        if !enemy.structures.attackable().is_empty() {
            let mut weight = phase.structure_weight();
            if state.buffs().holds_any(acting) {
                weight += 2;
            }
            if state.team(acting).herald_charge {
                weight += 1;
            }
            table.push(Candidate::Structure, weight);
        }

        table
    }

    fn push(&mut self, candidate: Candidate, weight: u32) {
        if weight == 0 {
            return;
        }
        match self.entries.iter_mut().find(|e| e.candidate == candidate) {
            Some(entry) => entry.weight += weight,
            None => self.entries.push(Entry { candidate, weight }),
        }
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn total_weight(&self) -> u32 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn weight_of(&self, candidate: Candidate) -> u32 {
        self.entries
            .iter()
            .find(|e| e.candidate == candidate)
            .map(|e| e.weight)
            .unwrap_or(0)
    }

    /// Map a roll in `0..total_weight()` onto an entry
    pub fn pick(&self, roll: u32) -> Option<Candidate> {
        let mut remaining = roll;
        for entry in &self.entries {
            if remaining < entry.weight {
                return Some(entry.candidate);
            }
            remaining -= entry.weight;
        }
        None
    }
}

fn combat_weights(phase: Phase) -> &'static [(EventKind, u32)] {
    match phase {
        Phase::Early => &[
            (EventKind::Kill, 2),
            (EventKind::Gank, 2),
            (EventKind::Skirmish, 1),
        ],
        Phase::Mid => &[
            (EventKind::Kill, 1),
            (EventKind::Gank, 1),
            (EventKind::Skirmish, 2),
            (EventKind::Teamfight, 1),
        ],
        Phase::Late => &[
            (EventKind::Kill, 1),
            (EventKind::Skirmish, 1),
            (EventKind::Teamfight, 2),
        ],
    }
}
