//! Outcome evaluator: terminal conditions and best-of-N set progression

use std::cmp::Ordering;

use rand::Rng;

use super::roster::Side;
use super::state::{DecidedBy, MatchState, SetResult, SetStatus, StateError};
use super::tuning::{SET_BUDGET_MAX, SET_BUDGET_MIN};

/// What the evaluator concluded for this tick
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The set keeps going
    Ongoing,
    /// A set ended and the next one has already been started
    NextSet { finished: SetResult, next_set: u8 },
    /// A set ended and with it the match
    MatchOver { finished: SetResult, winner: Side },
}

impl Outcome {
    pub fn finished_set(&self) -> Option<&SetResult> {
        match self {
            Outcome::Ongoing => None,
            Outcome::NextSet { finished, .. } | Outcome::MatchOver { finished, .. } => {
                Some(finished)
            }
        }
    }

    pub fn is_match_over(&self) -> bool {
        matches!(self, Outcome::MatchOver { .. })
    }
}

/// Fresh per-set time budget in simulated seconds
pub fn draw_set_budget<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(SET_BUDGET_MIN..=SET_BUDGET_MAX)
}

/// Check the current set for a fallen nexus or an exhausted time budget and
/// advance the set state machine accordingly.
pub fn evaluate<R: Rng + ?Sized>(
    state: &mut MatchState,
    rng: &mut R,
) -> Result<Outcome, StateError> {
    match state.status() {
        SetStatus::InProgress => {}
        SetStatus::MatchOver => return Err(StateError::MatchOver),
        SetStatus::SetOver => return Err(StateError::NotInProgress),
    }

    let (winner, decided_by) = if let Some(fallen) = state.fallen_nexus() {
        (fallen.opponent(), DecidedBy::Nexus)
    } else if state.budget_exhausted() {
        (forced_winner(state, rng), DecidedBy::TimeLimit)
    } else {
        return Ok(Outcome::Ongoing);
    };

    let finished = state.finish_set(winner, decided_by)?;
    if finished.match_over {
        return Ok(Outcome::MatchOver { finished, winner });
    }

    state.start_next_set(draw_set_budget(rng))?;
    Ok(Outcome::NextSet {
        finished,
        next_set: state.set_number(),
    })
}

/// Side holding the stronger position when the clock runs out: more enemy
/// structures destroyed, then kills, then gold, then a coin flip.
pub fn forced_winner<R: Rng + ?Sized>(state: &MatchState, rng: &mut R) -> Side {
    let a = state.team(Side::A);
    let b = state.team(Side::B);

    let ordering = b
        .structures
        .destroyed_count()
        .cmp(&a.structures.destroyed_count())
        .then(a.kills.cmp(&b.kills))
        .then(a.gold.cmp(&b.gold));

    match ordering {
        Ordering::Greater => Side::A,
        Ordering::Less => Side::B,
        Ordering::Equal => {
            if rng.gen_bool(0.5) {
                Side::A
            } else {
                Side::B
            }
        }
    }
}
