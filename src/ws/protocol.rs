//! Spectator wire messages
//! Every message is a JSON object tagged by `type`

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sim::events::{EventKind, EventPayload, MatchEvent};
use crate::sim::roster::{MatchCategory, Roster, Side};
use crate::sim::state::{Buffs, DecidedBy, MatchState, ObjectiveState, SetResult, TeamState};
use crate::store::FinishReason;

/// Messages sent from server to spectators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    MatchStarted {
        match_id: Uuid,
        category: MatchCategory,
        max_sets: u8,
        sets_to_win: u8,
        side_a: Roster,
        side_b: Roster,
    },

    /// Emitted every tick, whether or not an event fired
    MatchUpdate(Box<MatchUpdate>),

    MatchEvent {
        match_id: Uuid,
        set_number: u8,
        event_type: EventKind,
        time: u32,
        description: String,
        payload: EventPayload,
    },

    SetFinished {
        match_id: Uuid,
        set_number: u8,
        winning_side: Side,
        winning_team: Uuid,
        decided_by: DecidedBy,
        duration: u32,
        set_wins: [u8; 2],
    },

    SetStarted {
        match_id: Uuid,
        set_number: u8,
        set_wins: [u8; 2],
    },

    MatchFinished {
        match_id: Uuid,
        final_score: [u8; 2],
        winning_side: Option<Side>,
        winning_team: Option<Uuid>,
        reason: FinishReason,
    },

    Error {
        message: String,
    },
}

/// Full live view of the current set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchUpdate {
    pub match_id: Uuid,
    pub set_number: u8,
    pub simulated_time: u32,
    pub set_wins: [u8; 2],
    /// Team totals, structures and per-member live stats
    pub side_a: TeamState,
    pub side_b: TeamState,
    pub objectives: ObjectiveState,
    pub buffs: Buffs,
    pub dead_actor_ids: Vec<Uuid>,
}

impl ServerMsg {
    pub fn match_started(state: &MatchState) -> Self {
        ServerMsg::MatchStarted {
            match_id: state.match_id(),
            category: state.category(),
            max_sets: state.max_sets(),
            sets_to_win: state.sets_to_win(),
            side_a: state.roster(Side::A).clone(),
            side_b: state.roster(Side::B).clone(),
        }
    }

    pub fn match_update(state: &MatchState) -> Self {
        ServerMsg::MatchUpdate(Box::new(MatchUpdate {
            match_id: state.match_id(),
            set_number: state.set_number(),
            simulated_time: state.clock(),
            set_wins: state.set_wins(),
            side_a: state.team(Side::A).clone(),
            side_b: state.team(Side::B).clone(),
            objectives: state.objectives().clone(),
            buffs: state.buffs().clone(),
            dead_actor_ids: state.respawns().dead_ids(state.clock()),
        }))
    }

    pub fn match_event(match_id: Uuid, event: &MatchEvent) -> Self {
        ServerMsg::MatchEvent {
            match_id,
            set_number: event.set_number,
            event_type: event.kind,
            time: event.time,
            description: event.description.clone(),
            payload: event.payload.clone(),
        }
    }

    pub fn set_finished(state: &MatchState, result: &SetResult) -> Self {
        ServerMsg::SetFinished {
            match_id: state.match_id(),
            set_number: result.set_number,
            winning_side: result.winner,
            winning_team: state.roster(result.winner).team_id,
            decided_by: result.decided_by,
            duration: result.duration,
            set_wins: result.set_wins,
        }
    }

    pub fn set_started(state: &MatchState) -> Self {
        ServerMsg::SetStarted {
            match_id: state.match_id(),
            set_number: state.set_number(),
            set_wins: state.set_wins(),
        }
    }

    /// Final message for a match that reached `MatchOver`
    pub fn match_finished(state: &MatchState, reason: FinishReason) -> Self {
        let winning_side = state.winning_side();
        ServerMsg::MatchFinished {
            match_id: state.match_id(),
            final_score: state.set_wins(),
            winning_side,
            winning_team: winning_side.map(|side| state.roster(side).team_id),
            reason,
        }
    }

    /// Name of the `type` tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::MatchStarted { .. } => "match_started",
            ServerMsg::MatchUpdate(_) => "match_update",
            ServerMsg::MatchEvent { .. } => "match_event",
            ServerMsg::SetFinished { .. } => "set_finished",
            ServerMsg::SetStarted { .. } => "set_started",
            ServerMsg::MatchFinished { .. } => "match_finished",
            ServerMsg::Error { .. } => "error",
        }
    }
}
