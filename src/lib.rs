//! rigbeads - Store redirects, prefix routing, and agent session beads for
//! multi-rig agent fleets

pub mod commands;
pub mod config;
pub mod error;
pub mod fields;
pub mod fsutil;
pub mod lifecycle;
pub mod redirect;
pub mod routes;
pub mod store;
pub mod subprocess;
pub mod telemetry;
