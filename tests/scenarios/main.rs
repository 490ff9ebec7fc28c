//! Scenario-based tests for actionpipe

#[path = "../helpers.rs"]
mod helpers;

mod actions;
mod config;
mod doubling;
mod error_routing;
mod sequencing;
