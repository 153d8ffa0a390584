//! Clap CLI definitions for Holdfast.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  holdfast simulate                    Four peers, one lobby, clean links
  holdfast simulate --peers 6 --lossy  Drop a share of packets on every link
  holdfast config                      Show the effective protocol settings";

/// Holdfast: resource ownership and subscription for peer-to-peer sessions.
#[derive(Parser)]
#[command(name = "holdfast", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an in-process session: join a lobby, lease worlds, hand one off.
    Simulate {
        /// Number of participants, including the lobby host.
        #[arg(long, default_value_t = 4)]
        peers: usize,
        /// Give up after this many ticks.
        #[arg(long, default_value_t = 60)]
        ticks: u64,
        /// Periodically drop unreliable packets to each peer.
        #[arg(long)]
        lossy: bool,
    },
    /// Print the effective protocol configuration.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["holdfast", "simulate"]).unwrap();
        match cli.command {
            Commands::Simulate { peers, ticks, lossy } => {
                assert_eq!(peers, 4);
                assert_eq!(ticks, 60);
                assert!(!lossy);
            }
            Commands::Config => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "holdfast",
            "simulate",
            "--peers",
            "6",
            "--lossy",
            "--config",
            "/tmp/holdfast.toml",
            "--log-json",
        ])
        .unwrap();
        assert!(cli.log_json);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/holdfast.toml")));
        assert!(matches!(cli.command, Commands::Simulate { peers: 6, lossy: true, .. }));
    }
}
