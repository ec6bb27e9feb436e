//! Config subcommand handlers.

use std::path::PathBuf;

use dialoguer::{Input, Password, Select};
use serde::Serialize;

use vantage_config::{Config, EngineSettings, ProfilesSettings};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output::{self, OutputOpts};

// ── Helpers ─────────────────────────────────────────────────────────

fn target_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(vantage_config::config_path)
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Config as shown to the user: the plaintext secret is masked.
fn redacted(cfg: &Config) -> Config {
    let mut shown = cfg.clone();
    if shown.engine.secret.is_some() {
        shown.engine.secret = Some("********".into());
    }
    shown
}

#[derive(Serialize)]
struct PathReport {
    path: String,
    exists: bool,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => init(global),

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = crate::load_config(global)?;
            let out = OutputOpts::resolve(global, &cfg.defaults);
            let shown = redacted(&cfg);
            let rendered = output::render_single(
                &out.format,
                &shown,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("{c:#?}\n# {e}")),
                |c| c.engine.url.clone(),
            )?;
            output::print_output(rendered.trim_end(), out.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            let path = target_path(global);
            let report = PathReport {
                exists: tokio::fs::try_exists(&path).await.unwrap_or(false),
                path: path.display().to_string(),
            };
            let format = global.output.clone().unwrap_or(OutputFormat::Plain);
            let rendered = output::render_single(
                &format,
                &report,
                |r| r.path.clone(),
                |r| r.path.clone(),
            )?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }
    }
}

fn init(global: &GlobalOpts) -> Result<(), CliError> {
    let config_path = target_path(global);
    eprintln!("vantage configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    // 1. Engine URL
    let url: String = Input::new()
        .with_prompt("Engine controller URL")
        .default(EngineSettings::default().url)
        .interact_text()
        .map_err(prompt_err)?;

    // 2. Secret
    let secret = Password::new()
        .with_prompt("Engine secret (leave empty for none)")
        .allow_empty_password(true)
        .interact()
        .map_err(prompt_err)?;

    let plaintext_secret = if secret.is_empty() {
        None
    } else {
        let store_choices = &[
            "Store in system keyring (recommended)",
            "Save to config file (plaintext)",
        ];
        let store_selection = Select::new()
            .with_prompt("Where to store the secret?")
            .items(store_choices)
            .default(0)
            .interact()
            .map_err(prompt_err)?;

        if store_selection == 0 {
            vantage_config::store_secret(&secret)?;
            eprintln!("   ✓ Secret stored in system keyring");
            None
        } else {
            Some(secret)
        }
    };

    // 3. Profiles index
    let profiles_path: String = Input::new()
        .with_prompt("Path to profiles.yaml")
        .default(
            vantage_config::default_profiles_path()
                .display()
                .to_string(),
        )
        .interact_text()
        .map_err(prompt_err)?;

    let cfg = Config {
        engine: EngineSettings {
            url,
            secret: plaintext_secret,
            ..EngineSettings::default()
        },
        profiles: ProfilesSettings {
            path: Some(PathBuf::from(profiles_path)),
        },
        ..Config::default()
    };

    // Validate before writing so a typo doesn't land on disk.
    cfg.to_core_config()?;
    vantage_config::save_config_to(&config_path, &cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("\n  Test it: vantage watch traffic --count 3");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_plaintext_secret() {
        let mut cfg = Config::default();
        cfg.engine.secret = Some("hunter2".into());
        let shown = redacted(&cfg);
        assert_eq!(shown.engine.secret.as_deref(), Some("********"));
        assert_eq!(shown.engine.url, cfg.engine.url);
    }

    #[test]
    fn show_leaves_missing_secret_alone() {
        assert!(redacted(&Config::default()).engine.secret.is_none());
    }
}
