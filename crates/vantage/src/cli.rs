//! Clap derive structures for the `vantage` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use vantage_core::KnownStream;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// vantage -- watch a proxy engine's live telemetry and switch profiles
#[derive(Debug, Parser)]
#[command(
    name = "vantage",
    version,
    about = "Watch proxy engine telemetry and switch profiles from the command line",
    long_about = "Follows the engine's live streams (traffic, memory, connections, logs)\n\
        over self-healing WebSocket connections, and switches the active\n\
        profile through a latest-wins queue.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file to use instead of the platform default
    #[arg(long, env = "VANTAGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Engine controller URL (overrides the config file)
    #[arg(long, short = 'e', env = "VANTAGE_ENGINE_URL", global = true)]
    pub engine: Option<String>,

    /// Output format [default: from config, else table]
    #[arg(long, short = 'o', env = "VANTAGE_OUTPUT", global = true)]
    pub output: Option<OutputFormat>,

    /// When to use color output [default: from config, else auto]
    #[arg(long, global = true)]
    pub color: Option<ColorMode>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides the config file)
    #[arg(long, env = "VANTAGE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow one of the engine's live streams
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List profiles, marking the current one
    #[command(alias = "ls")]
    Profiles(ProfilesArgs),

    /// Switch the engine to another profile
    #[command(alias = "use")]
    Switch(SwitchArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stream to follow
    pub stream: StreamName,

    /// Stop after this many values
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long = "for", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Emit one compact JSON object per line
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamName {
    /// Upload/download rate, once per second
    Traffic,
    /// Engine memory usage
    Memory,
    /// Open connections and totals
    Connections,
    /// Engine log lines
    Logs,
}

impl From<StreamName> for KnownStream {
    fn from(name: StreamName) -> Self {
        match name {
            StreamName::Traffic => KnownStream::Traffic,
            StreamName::Memory => KnownStream::Memory,
            StreamName::Connections => KnownStream::Connections,
            StreamName::Logs => KnownStream::Logs,
        }
    }
}

// ── Profiles ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProfilesArgs {
    /// Keep running and report changes, re-reading every INTERVAL (e.g. "5s")
    #[arg(long, value_name = "INTERVAL", value_parser = humantime::parse_duration)]
    pub follow: Option<Duration>,
}

// ── Switch ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SwitchArgs {
    /// UID of the profile to activate
    pub uid: String,

    /// Do not print a success notice (errors are still reported)
    #[arg(long)]
    pub silent: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create the config file with guided setup
    Init,

    /// Display the resolved configuration
    Show,

    /// Print the config file location
    Path,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stream_names_map_to_known_streams() {
        assert_eq!(KnownStream::from(StreamName::Logs).as_ref(), "logs");
        assert_eq!(KnownStream::from(StreamName::Traffic).as_ref(), "traffic");
    }
}
