//! One tick of one match: the synchronous part run under the match lock

use tracing::warn;

use super::pool::LiveMatch;
use crate::sim::generator::{generate, SidePower};
use crate::sim::outcome::{evaluate, Outcome};
use crate::sim::roster::Side;
use crate::sim::state::{SetResult, StateError};
use crate::store::{ArchivedSet, FinishReason};
use crate::ws::protocol::ServerMsg;

/// How a match left the running pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ending {
    pub winner: Option<Side>,
    pub score: [u8; 2],
    pub reason: FinishReason,
}

/// Side effects produced by a tick, applied by the driver after the lock is
/// released
#[derive(Debug, Default)]
pub struct TickOutput {
    /// In broadcast order
    pub messages: Vec<ServerMsg>,
    pub snapshot: Option<serde_json::Value>,
    pub archived: Vec<ArchivedSet>,
    pub ending: Option<Ending>,
}

/// Advance `live` by one tick of `sim_seconds`. A pending cancel ends the
/// match before anything else happens.
pub fn step(
    live: &mut LiveMatch,
    sim_seconds: u32,
    cancel: bool,
) -> Result<TickOutput, StateError> {
    if live.state.is_match_over() {
        return Err(StateError::MatchOver);
    }

    let mut out = TickOutput::default();

    if cancel {
        let winner = live.state.conclude()?;
        out.messages.push(ServerMsg::match_finished(
            &live.state,
            FinishReason::Cancelled,
        ));
        out.ending = Some(Ending {
            winner,
            score: live.state.set_wins(),
            reason: FinishReason::Cancelled,
        });
        out.snapshot = encode(live);
        return Ok(out);
    }

    let state = &mut live.state;
    state.advance_clock(sim_seconds)?;
    state.prune_respawns();

    let power = SidePower::compute(state);
    if let Some(event) = generate(state, &power, &mut live.rng) {
        out.messages
            .push(ServerMsg::match_event(state.match_id(), &event));
    }

    // The update shows the tick's final moment, before any set reset
    out.messages.push(ServerMsg::match_update(state));

    match evaluate(state, &mut live.rng)? {
        Outcome::Ongoing => {}
        Outcome::NextSet { finished, .. } => {
            out.messages.push(ServerMsg::set_finished(state, &finished));
            out.messages.push(ServerMsg::set_started(state));
            out.archived.push(archive(live, finished));
        }
        Outcome::MatchOver { finished, winner } => {
            out.messages.push(ServerMsg::set_finished(state, &finished));
            out.messages.push(ServerMsg::match_finished(
                state,
                FinishReason::Completed,
            ));
            out.ending = Some(Ending {
                winner: Some(winner),
                score: state.set_wins(),
                reason: FinishReason::Completed,
            });
            out.archived.push(archive(live, finished));
        }
    }

    out.snapshot = encode(live);
    Ok(out)
}

fn archive(live: &LiveMatch, set: SetResult) -> ArchivedSet {
    ArchivedSet {
        match_id: live.state.match_id(),
        set_number: set.set_number,
        winner_side: set.winner,
        winner_team: live.state.roster(set.winner).team_id,
        decided_by: set.decided_by,
        duration: set.duration,
        events: set.events,
    }
}

fn encode(live: &LiveMatch) -> Option<serde_json::Value> {
    match live.snapshot() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(match_id = %live.state.match_id(), error = %e, "Snapshot encoding failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::roster::fixtures::roster;
    use crate::sim::roster::MatchCategory;
    use crate::sim::state::{MatchState, SetStatus};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn live(seed: u64) -> LiveMatch {
        let state = MatchState::new(
            Uuid::new_v4(),
            MatchCategory::Regular,
            roster("a", 55.0),
            roster("b", 45.0),
            2400,
        );
        LiveMatch::new(state, ChaCha8Rng::seed_from_u64(seed))
    }

    #[test]
    fn every_tick_broadcasts_an_update_and_a_snapshot() {
        let mut live = live(1);
        let out = step(&mut live, 10, false).unwrap();
        assert_eq!(live.state.clock(), 10);
        assert!(out
            .messages
            .iter()
            .any(|m| matches!(m, ServerMsg::MatchUpdate(_))));
        assert!(out.snapshot.is_some());
        assert!(out.ending.is_none());
    }

    #[test]
    fn events_precede_the_update() {
        let mut live = live(8);
        for _ in 0..500 {
            let out = step(&mut live, 10, false).unwrap();
            if let Some(pos) = out
                .messages
                .iter()
                .position(|m| matches!(m, ServerMsg::MatchEvent { .. }))
            {
                assert_eq!(pos, 0);
                assert!(matches!(out.messages[1], ServerMsg::MatchUpdate(_)));
                return;
            }
        }
        panic!("no event fired in 500 ticks");
    }

    #[test]
    fn cancel_concludes_with_the_current_scoreline() {
        let mut live = live(2);
        step(&mut live, 10, false).unwrap();
        let clock = live.state.clock();

        let out = step(&mut live, 10, true).unwrap();
        assert_eq!(live.state.clock(), clock);
        assert_eq!(live.state.status(), SetStatus::MatchOver);
        assert_eq!(
            out.ending,
            Some(Ending {
                winner: None,
                score: [0, 0],
                reason: FinishReason::Cancelled,
            })
        );
        assert!(matches!(
            out.messages.as_slice(),
            [ServerMsg::MatchFinished { .. }]
        ));
        assert!(matches!(
            step(&mut live, 10, false),
            Err(StateError::MatchOver)
        ));
    }

    #[test]
    fn a_full_match_ends_with_archived_sets_and_a_winner() {
        let mut live = live(77);
        let mut archived = Vec::new();
        let mut ending = None;
        for _ in 0..20_000 {
            let out = step(&mut live, 10, false).unwrap();
            archived.extend(out.archived);
            if out.ending.is_some() {
                let last = out.messages.last().unwrap();
                assert!(matches!(last, ServerMsg::MatchFinished { .. }));
                ending = out.ending;
                break;
            }
        }

        let ending = ending.expect("match should finish");
        assert_eq!(ending.reason, FinishReason::Completed);
        let winner = ending.winner.unwrap();
        assert_eq!(ending.score[winner.index()], 2);
        assert_eq!(archived.len(), (ending.score[0] + ending.score[1]) as usize);
        for (i, set) in archived.iter().enumerate() {
            assert_eq!(set.set_number as usize, i + 1);
        }
    }
}
