//! Courier gateway binary internals.
//!
//! `courier serve` runs the supervisor behind an HTTP facade; every other
//! subcommand is a thin client for that facade.

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod server;
pub mod styles;
