//! `vantage profiles`: list profiles with the current one marked.

use chrono::DateTime;
use owo_colors::OwoColorize;
use tabled::Tabled;

use vantage_core::{Coordinator, CoreConfig, ProfileItem, ProfilesConfig};

use crate::cli::{OutputFormat, ProfilesArgs};
use crate::error::CliError;
use crate::output::{self, OutputOpts};

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "UID")]
    uid: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

fn to_row(item: &ProfileItem, current: Option<&str>) -> ProfileRow {
    ProfileRow {
        marker: if current == Some(item.uid.as_str()) { "*" } else { "" },
        uid: item.uid.clone(),
        name: item.display_name().to_owned(),
        kind: item.kind.clone().unwrap_or_default(),
        updated: item.updated.and_then(format_updated).unwrap_or_default(),
    }
}

fn format_updated(secs: u64) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::from_timestamp(secs, 0).map(|at| at.format("%Y-%m-%d %H:%M").to_string())
}

pub async fn handle(
    args: ProfilesArgs,
    core: &CoreConfig,
    out: &OutputOpts,
) -> Result<(), CliError> {
    let coordinator = Coordinator::from_config(core);
    let result = match args.follow {
        None => list_once(&coordinator, core, out).await,
        Some(interval) => follow(&coordinator, core, out, interval).await,
    };
    coordinator.shutdown();
    result
}

async fn list_once(
    coordinator: &Coordinator,
    core: &CoreConfig,
    out: &OutputOpts,
) -> Result<(), CliError> {
    let profiles = coordinator
        .refresh_profiles()
        .await
        .map_err(|e| unavailable(core, &e.message()))?;
    print_profiles(&profiles, out)
}

/// Re-read the index every `interval` and print whenever the current
/// profile changes, until interrupted.
async fn follow(
    coordinator: &Coordinator,
    core: &CoreConfig,
    out: &OutputOpts,
    interval: std::time::Duration,
) -> Result<(), CliError> {
    let first = coordinator
        .refresh_profiles()
        .await
        .map_err(|e| unavailable(core, &e.message()))?;
    print_profiles(&first, out)?;

    let _poll = coordinator.poll_profiles(interval);
    let mut state = coordinator.profiles().subscribe();
    let mut shown = first.current;

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(profiles) = state.borrow_and_update().effective_profiles() else {
                    continue;
                };
                if profiles.current != shown {
                    print_profiles(&profiles, out)?;
                    shown = profiles.current;
                }
            }
        }
    }
    Ok(())
}

fn print_profiles(profiles: &ProfilesConfig, out: &OutputOpts) -> Result<(), CliError> {
    let current = profiles.current.as_deref();
    let rendered = output::render_list(
        &out.format,
        &profiles.items,
        |item| to_row(item, current),
        |item| item.uid.clone(),
    )?;
    output::print_output(&rendered, out.quiet);

    if out.quiet || out.format != OutputFormat::Table {
        return Ok(());
    }
    match profiles.current_item() {
        Some(item) if out.color => {
            eprintln!("current: {}", item.display_name().green().bold());
        }
        Some(item) => eprintln!("current: {}", item.display_name()),
        None => eprintln!("current: (none)"),
    }
    Ok(())
}

fn unavailable(core: &CoreConfig, reason: &str) -> CliError {
    CliError::ProfilesUnavailable {
        path: core.profiles_path.display().to_string(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(yaml: &str) -> ProfileItem {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn current_profile_is_marked() {
        let p1 = item("uid: p1\nname: Home\ntype: local");
        let row = to_row(&p1, Some("p1"));
        assert_eq!(row.marker, "*");
        assert_eq!(row.name, "Home");
        assert_eq!(row.kind, "local");

        assert_eq!(to_row(&p1, Some("p2")).marker, "");
    }

    #[test]
    fn updated_timestamp_is_formatted() {
        assert_eq!(
            format_updated(1_700_000_000).as_deref(),
            Some("2023-11-14 22:13")
        );
    }
}
