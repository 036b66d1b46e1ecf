//! Command line argument parsing
//!
//! Subcommands:
//! - `simulate`: Run the sync client against an in-process loopback server
//! - `init-config`: Write a default configuration file
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Simulate(SimulateConfig),
    InitConfig(PathBuf),
    ShowConfig,
}

#[derive(Debug, Clone)]
pub struct SimulateConfig {
    pub config_override: Option<PathBuf>,
    pub ticks: u32,
    pub drop_start_acks: u32,
    pub skip_end_ack: bool,
    pub disconnect_at: Option<u32>,
    pub events_per_tick: u32,
    pub tick_ms: u64,
    pub seed: Option<u64>,
    pub verbose: bool,
}

#[derive(Debug, Parser)]
#[command(name = "challenge-sync")]
#[command(author = "Challenge Sync Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Synchronize tick-indexed challenge recordings with a recording server")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a scripted challenge against an in-process server
    Simulate {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Ticks to run the challenge for
        #[arg(short = 't', long = "ticks", default_value_t = 20)]
        ticks: u32,
        /// Start acknowledgments the server drops before answering
        #[arg(long = "drop-start-acks", default_value_t = 0)]
        drop_start_acks: u32,
        /// Never acknowledge the end request
        #[arg(long = "skip-end-ack")]
        skip_end_ack: bool,
        /// Drop the connection at this tick and resume through confirmation
        #[arg(long = "disconnect-at", value_name = "TICK")]
        disconnect_at: Option<u32>,
        /// Bulk events produced per tick
        #[arg(long = "events-per-tick", default_value_t = 3)]
        events_per_tick: u32,
        /// Wall-clock milliseconds between ticks
        #[arg(long = "tick-ms", default_value_t = 50)]
        tick_ms: u64,
        /// Seed for generated event data
        #[arg(long = "seed")]
        seed: Option<u64>,
        /// Print every message exchanged
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Write a default configuration file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Simulate {
                config,
                ticks,
                drop_start_acks,
                skip_end_ack,
                disconnect_at,
                events_per_tick,
                tick_ms,
                seed,
                verbose,
            }) => {
                if *ticks == 0 {
                    return Err("--ticks must be at least 1".to_string());
                }
                if let Some(tick) = disconnect_at
                    && *tick >= *ticks
                {
                    return Err(format!(
                        "--disconnect-at {} is past the end of a {} tick run",
                        tick, ticks
                    ));
                }
                Ok(ExecutionMode::Simulate(SimulateConfig {
                    config_override: config.clone(),
                    ticks: *ticks,
                    drop_start_acks: *drop_start_acks,
                    skip_end_ack: *skip_end_ack,
                    disconnect_at: *disconnect_at,
                    events_per_tick: *events_per_tick,
                    tick_ms: *tick_ms,
                    seed: *seed,
                    verbose: *verbose,
                }))
            }
            Some(Commands::InitConfig { path }) => Ok(ExecutionMode::InitConfig(path.clone())),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err("No command provided".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_defaults() {
        let args = Args::try_parse_from(["challenge-sync", "simulate"]).unwrap();
        match args.mode().unwrap() {
            ExecutionMode::Simulate(config) => {
                assert_eq!(config.ticks, 20);
                assert_eq!(config.drop_start_acks, 0);
                assert!(!config.skip_end_ack);
                assert!(config.disconnect_at.is_none());
                assert_eq!(config.tick_ms, 50);
                assert!(config.seed.is_none());
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_simulate_flags() {
        let args = Args::try_parse_from([
            "challenge-sync",
            "simulate",
            "--ticks",
            "50",
            "--drop-start-acks",
            "2",
            "--disconnect-at",
            "30",
            "--skip-end-ack",
            "--seed",
            "7",
        ])
        .unwrap();
        match args.mode().unwrap() {
            ExecutionMode::Simulate(config) => {
                assert_eq!(config.ticks, 50);
                assert_eq!(config.drop_start_acks, 2);
                assert_eq!(config.disconnect_at, Some(30));
                assert!(config.skip_end_ack);
                assert_eq!(config.seed, Some(7));
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_disconnect_past_end_rejected() {
        let args = Args::try_parse_from([
            "challenge-sync",
            "simulate",
            "--ticks",
            "10",
            "--disconnect-at",
            "10",
        ])
        .unwrap();
        assert!(args.mode().is_err());
    }

    #[test]
    fn test_init_config_requires_path() {
        assert!(Args::try_parse_from(["challenge-sync", "init-config"]).is_err());

        let args = Args::try_parse_from(["challenge-sync", "init-config", "out.toml"]).unwrap();
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::InitConfig(p) if p == PathBuf::from("out.toml")
        ));
    }
}
