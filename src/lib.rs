//! Live match simulation server
//!
//! Simulates best-of-N league matches tick by tick, persists each match's
//! state so it survives restarts, streams updates to spectators and hands
//! final results to settlement.

pub mod app;
pub mod config;
pub mod engine;
pub mod http;
pub mod settlement;
pub mod sim;
pub mod store;
pub mod util;
pub mod ws;
