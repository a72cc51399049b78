//! Command-line arguments and logging setup.

use crate::commands::Command;
use clap::{ArgAction, Parser};
use tracing::Level;

/// Inspect Ketama key placement without touching any server.
#[derive(Debug, Parser)]
#[command(name = "ketama", version, about)]
pub struct CliConfig {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }

    /// Install a stderr fmt subscriber. A subscriber that is already set wins.
    pub fn init_logging(&self) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(self.log_level())
            .with_writer(std::io::stderr)
            .try_init();
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let result = self.command.execute()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            print!("{}", result.render());
        }
        Ok(())
    }
}
