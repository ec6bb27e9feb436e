mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use vantage_config::Config;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;
use crate::output::OutputOpts;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "vantage", &mut std::io::stdout());
            Ok(())
        }

        // Config commands work without a valid engine configuration
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global).await,

        cmd => {
            let cfg = load_config(&cli.global)?;
            let out = OutputOpts::resolve(&cli.global, &cfg.defaults);
            let core = cfg.to_core_config()?;

            tracing::debug!(command = ?cmd, engine = %core.engine_url, "dispatching command");
            commands::dispatch(cmd, &core, &out).await
        }
    }
}

/// Load the config file named by `--config` (or the platform default),
/// then apply command-line overrides.
pub(crate) fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(vantage_config::config_path);
    let mut cfg = vantage_config::load_config_from(&path)?;

    if let Some(ref url) = global.engine {
        cfg.engine.url.clone_from(url);
    }
    if let Some(timeout) = global.timeout {
        cfg.engine.timeout = timeout;
    }
    Ok(cfg)
}
