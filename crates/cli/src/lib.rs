//! Offline inspection of Ketama key placement.
//!
//! Provides commands for:
//! - Locating keys against a server list, optionally with dead servers
//! - Showing each server's share of the ring

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
