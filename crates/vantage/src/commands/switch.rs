//! `vantage switch <uid>`: reload the engine with another profile.
//!
//! The switch goes through the coordinator's queue like any UI-driven
//! switch would, so the command prints the same event sequence a
//! long-running consumer observes, then the profile the store settled on.

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use vantage_api::EngineClient;
use vantage_core::{Coordinator, CoreConfig, CoreError, ProfilesFile, SwitchEvent};

use crate::cli::SwitchArgs;
use crate::error::CliError;
use crate::output::{self, OutputOpts};

#[derive(Debug, Serialize)]
struct SwitchReport {
    profile: String,
    name: String,
    /// Current profile as the store sees it after the switch.
    current: Option<String>,
    /// Whether the profile index was re-read after the switch.
    confirmed: bool,
    elapsed_ms: u64,
}

pub async fn handle(args: SwitchArgs, core: &CoreConfig, out: &OutputOpts) -> Result<(), CliError> {
    let file = ProfilesFile::new(core.profiles_path.clone());
    let index = file.load().await?;
    let name = index
        .item(&args.uid)
        .ok_or_else(|| CoreError::ProfileNotFound {
            uid: args.uid.clone(),
        })?
        .display_name()
        .to_owned();

    let engine = EngineClient::new(core.engine_url.clone(), core.secret.clone(), core.timeout)
        .map_err(CoreError::from)?;

    let coordinator = Coordinator::from_config(core);
    let result = run_switch(&coordinator, engine, file, &args, &name, core, out).await;
    coordinator.shutdown();
    result
}

async fn run_switch(
    coordinator: &Coordinator,
    engine: EngineClient,
    file: ProfilesFile,
    args: &SwitchArgs,
    name: &str,
    core: &CoreConfig,
    out: &OutputOpts,
) -> Result<(), CliError> {
    coordinator.refresh_profiles().await?;

    let mut events = coordinator.switches().events();
    let spinner = spinner(out, name);
    let started = Instant::now();

    coordinator.switch_profile(Coordinator::engine_switch_task(
        engine,
        file,
        args.uid.clone(),
        !args.silent,
    ));

    let mut failure = None;
    loop {
        match events.recv().await {
            Ok(event) => {
                report_event(&event, spinner.as_ref(), out);
                match event {
                    SwitchEvent::Error { message, .. } => failure = Some(message),
                    SwitchEvent::Idle => break,
                    _ => {}
                }
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "switch events lagged"),
            Err(RecvError::Closed) => break,
        }
    }

    if let Some(message) = failure {
        if let Some(ref pb) = spinner {
            pb.finish_and_clear();
        }
        return Err(CliError::SwitchFailed {
            profile: args.uid.clone(),
            message,
        });
    }

    if let Some(ref pb) = spinner {
        pb.set_message("confirming profile index");
    }
    let mut state = coordinator.profiles().subscribe();
    let confirmed = tokio::time::timeout(core.timeout, state.wait_for(|s| !s.hydrating))
        .await
        .is_ok_and(|waited| waited.is_ok());
    if !confirmed {
        warn!(profile = %args.uid, "profile index not confirmed, showing the optimistic selection");
    }
    if let Some(ref pb) = spinner {
        pb.finish_and_clear();
    }

    let report = SwitchReport {
        profile: args.uid.clone(),
        name: name.to_owned(),
        current: coordinator.profiles().effective_current(),
        confirmed,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    let rendered = output::render_single(
        &out.format,
        &report,
        |r| detail(r, out.color),
        |r| r.current.clone().unwrap_or_default(),
    )?;
    output::print_output(&rendered, out.quiet || args.silent);
    Ok(())
}

fn spinner(out: &OutputOpts, name: &str) -> Option<ProgressBar> {
    if out.quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(format!("switching to {name}"));
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn report_event(event: &SwitchEvent, spinner: Option<&ProgressBar>, out: &OutputOpts) {
    if out.quiet {
        return;
    }
    let line = if out.color {
        format!("{} {event}", "queue:".dimmed())
    } else {
        format!("queue: {event}")
    };
    match spinner {
        Some(pb) => pb.println(line),
        None => eprintln!("{line}"),
    }
}

fn detail(report: &SwitchReport, color: bool) -> String {
    let elapsed = humantime::format_duration(Duration::from_millis(report.elapsed_ms));
    let mut line = format!(
        "Switched to {} ({}) in {elapsed}",
        report.name, report.profile
    );
    if !report.confirmed {
        line.push_str(" (not yet confirmed)");
    }
    if color {
        format!("{} {line}", "✓".green().bold())
    } else {
        format!("✓ {line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_flags_unconfirmed_switches() {
        let report = SwitchReport {
            profile: "p2".into(),
            name: "Office".into(),
            current: Some("p2".into()),
            confirmed: false,
            elapsed_ms: 1_250,
        };
        assert_eq!(
            detail(&report, false),
            "✓ Switched to Office (p2) in 1s 250ms (not yet confirmed)"
        );
    }
}
