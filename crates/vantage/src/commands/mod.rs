//! Command dispatch: bridges CLI args -> coordinator -> output formatting.

pub mod config_cmd;
pub mod profiles;
pub mod switch;
pub mod watch;

use vantage_core::CoreConfig;

use crate::cli::Command;
use crate::error::CliError;
use crate::output::OutputOpts;

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, core: &CoreConfig, out: &OutputOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, core, out).await,
        Command::Profiles(args) => profiles::handle(args, core, out).await,
        Command::Switch(args) => switch::handle(args, core, out).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}
