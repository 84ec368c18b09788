//! CLI command dispatch and handlers
//!
//! Routes parsed CLI arguments to the appropriate command handler.

pub mod bosses;
pub mod simulate;
pub mod validate;
pub mod version;

use crate::cli::args::{Cli, Commands};
use crate::error::RaidBossError;

/// Dispatch a parsed CLI invocation to the appropriate command handler.
///
/// # Errors
///
/// Returns an error if the dispatched command handler fails.
pub async fn dispatch(cli: Cli) -> Result<(), RaidBossError> {
    match cli.command {
        Commands::Validate(args) => validate::run(&args),
        Commands::Bosses(args) => bosses::run(&args),
        Commands::Simulate(args) => simulate::run(&args).await,
        Commands::Version(args) => {
            version::run(&args);
            Ok(())
        }
    }
}
