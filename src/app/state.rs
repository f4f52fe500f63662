//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::engine::Engine;
use crate::store::{MatchStore, RosterDirectory};
use crate::ws::hub::Hub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<Engine>,
    /// Spectator channels, also the engine's broadcaster
    pub hub: Arc<Hub>,
    pub store: Arc<dyn MatchStore>,
    pub rosters: Arc<dyn RosterDirectory>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: Arc<Engine>,
        hub: Arc<Hub>,
        store: Arc<dyn MatchStore>,
        rosters: Arc<dyn RosterDirectory>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            hub,
            store,
            rosters,
        }
    }
}
