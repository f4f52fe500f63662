//! Match simulation: state, event generation and set progression

pub mod events;
pub mod generator;
pub mod outcome;
pub mod roster;
pub mod state;
pub mod table;
pub mod tuning;

pub use events::{EventKind, MatchEvent};
pub use generator::{generate, SidePower};
pub use outcome::{draw_set_budget, evaluate, Outcome};
pub use roster::{MatchCategory, Role, Roster, RosterError, RosterMember, Side, Tactics};
pub use state::{MatchState, SetResult, SetStatus, StateError};
