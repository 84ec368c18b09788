//! CLI argument definitions
//!
//! All Clap derive structs for `raidboss` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

// ============================================================================
// Root CLI
// ============================================================================

/// World boss raid coordinator.
#[derive(Parser, Debug)]
#[command(name = "raidboss", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "RAIDBOSS_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "RAIDBOSS_LOG_FORMAT")]
    pub log_format: OutputFormat,
}

// ============================================================================
// Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate boss catalog files.
    Validate(ValidateArgs),

    /// List the bosses in a catalog.
    Bosses(BossesArgs),

    /// Run a synthetic raid against a catalog boss.
    Simulate(SimulateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Catalog files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Treat warnings as errors.
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for `bosses`.
#[derive(Args, Debug)]
pub struct BossesArgs {
    /// Catalog file.
    #[arg(short, long, env = "RAIDBOSS_CONFIG")]
    pub config: PathBuf,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Catalog file.
    #[arg(short, long, env = "RAIDBOSS_CONFIG")]
    pub config: PathBuf,

    /// Boss definition id to spawn.
    #[arg(short, long)]
    pub boss: String,

    /// Number of synthetic participants.
    #[arg(long, default_value_t = 20)]
    pub players: u32,

    /// Number of guilds participants are spread over (0 for none).
    #[arg(long, default_value_t = 4)]
    pub guilds: u32,

    /// Attacks per participant (defaults to the boss's attempt limit).
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Heroes per team.
    #[arg(long, default_value_t = 3)]
    pub team_size: usize,

    /// Seed for the combat simulator.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Leaderboard rows to print.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Write the raid event stream (JSONL) to this file.
    #[arg(long, env = "RAIDBOSS_EVENTS_FILE")]
    pub events_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "RAIDBOSS_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

/// Arguments for `version`.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["raidboss", "validate"]).is_err());
        assert!(Cli::try_parse_from(["raidboss", "validate", "a.yaml", "b.yaml"]).is_ok());
    }

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from([
            "raidboss",
            "simulate",
            "--config",
            "bosses.yaml",
            "--boss",
            "frost_wyrm",
        ])
        .unwrap();
        let Commands::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.players, 20);
        assert_eq!(args.guilds, 4);
        assert_eq!(args.seed, 42);
        assert_eq!(args.rounds, None);
        assert_eq!(args.format, OutputFormat::Human);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["raidboss", "version", "-vv", "--color", "never"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.color, ColorChoice::Never);
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["raidboss", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_output() {
        let err = Cli::try_parse_from(["raidboss", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
