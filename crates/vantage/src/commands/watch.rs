//! `vantage watch <stream>`: follow one live stream until interrupted.

use std::future;

use bytesize::ByteSize;
use futures_util::StreamExt;
use owo_colors::OwoColorize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use vantage_core::{
    ConnectionState, ConnectionsSnapshot, Coordinator, CoreConfig, KnownStream, LiveView, LogLine,
    MemorySample, StreamHub, TrafficSample,
};

use crate::cli::{OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output::{self, OutputOpts};

pub async fn handle(args: WatchArgs, core: &CoreConfig, out: &OutputOpts) -> Result<(), CliError> {
    let coordinator = Coordinator::from_config(core);
    let hub = coordinator.streams();

    let result = match KnownStream::from(args.stream) {
        KnownStream::Traffic => {
            follow::<TrafficSample>(hub, KnownStream::Traffic, &args, out, render_traffic).await
        }
        KnownStream::Memory => {
            follow::<MemorySample>(hub, KnownStream::Memory, &args, out, render_memory).await
        }
        KnownStream::Connections => {
            follow::<ConnectionsSnapshot>(
                hub,
                KnownStream::Connections,
                &args,
                out,
                render_connections,
            )
            .await
        }
        KnownStream::Logs => {
            follow::<LogLine>(hub, KnownStream::Logs, &args, out, render_log).await
        }
    };

    coordinator.shutdown();
    result
}

/// Print values from `stream` until the count or duration is reached, or
/// the user interrupts. Connection health changes go to stderr.
async fn follow<T>(
    hub: &StreamHub,
    stream: KnownStream,
    args: &WatchArgs,
    out: &OutputOpts,
    render: fn(&T, bool) -> String,
) -> Result<(), CliError>
where
    T: DeserializeOwned + Serialize + Send + Sync + 'static,
{
    let name = stream.as_ref();
    let view = LiveView::<T>::subscribe(hub, name);
    let mut health = hub.watch_health(name);
    let mut snapshots = view.into_stream();

    let format = if args.json {
        OutputFormat::JsonCompact
    } else {
        out.format.clone()
    };
    let deadline = args.duration.map(|d| Instant::now() + d);
    let stop_at = async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => future::pending().await,
        }
    };
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(stop_at, interrupt);

    let mut printed = 0usize;
    let mut last_received = None;
    let mut last_error: Option<String> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut interrupt => {
                debug!(stream = name, "interrupted");
                break;
            }
            () = &mut stop_at => break,
            changed = health_changed(health.as_mut()) => {
                match changed {
                    Some(state) => report_health(name, &state, out),
                    None => health = None,
                }
            }
            snapshot = snapshots.next() => {
                let Some(snapshot) = snapshot else { break };

                if snapshot.error != last_error {
                    if let Some(ref message) = snapshot.error {
                        if !out.quiet {
                            eprintln!("{name}: {message}; reconnecting");
                        }
                    }
                    last_error.clone_from(&snapshot.error);
                }
                if snapshot.received_at == last_received {
                    continue;
                }
                last_received = snapshot.received_at;
                let Some(value) = snapshot.value else { continue };

                let line = match format {
                    OutputFormat::Json | OutputFormat::JsonCompact => {
                        output::render_json(&*value, true)?
                    }
                    OutputFormat::Yaml => format!("---\n{}", output::render_yaml(&*value)?),
                    OutputFormat::Table | OutputFormat::Plain => render(&value, out.color),
                };
                output::print_output(&line, out.quiet);

                printed += 1;
                if args.count.is_some_and(|n| printed >= n) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Next health transition, or `None` once the connection is gone. Never
/// resolves when there is nothing to watch.
async fn health_changed(
    receiver: Option<&mut watch::Receiver<ConnectionState>>,
) -> Option<ConnectionState> {
    let Some(receiver) = receiver else {
        return future::pending().await;
    };
    receiver.changed().await.ok()?;
    Some(receiver.borrow_and_update().clone())
}

fn report_health(name: &str, state: &ConnectionState, out: &OutputOpts) {
    if out.quiet {
        return;
    }
    let text = match state {
        ConnectionState::Open => "connected".to_owned(),
        ConnectionState::Backoff { attempt, .. } => format!("retrying (attempt {attempt})"),
        other => other.label().to_owned(),
    };
    if out.color {
        eprintln!("{} {}", format!("{name}:").dimmed(), text.yellow());
    } else {
        eprintln!("{name}: {text}");
    }
}

// ── Line renderers ───────────────────────────────────────────────────

fn rate(bytes_per_sec: u64) -> String {
    format!("{}/s", ByteSize(bytes_per_sec))
}

fn render_traffic(sample: &TrafficSample, color: bool) -> String {
    let up = format!("{:>12}", rate(sample.up));
    let down = format!("{:>12}", rate(sample.down));
    if color {
        format!("↑ {}  ↓ {}", up.magenta(), down.cyan())
    } else {
        format!("↑ {up}  ↓ {down}")
    }
}

fn render_memory(sample: &MemorySample, _color: bool) -> String {
    if sample.oslimit == 0 {
        format!("in use {}", ByteSize(sample.inuse))
    } else {
        format!(
            "in use {} of {}",
            ByteSize(sample.inuse),
            ByteSize(sample.oslimit)
        )
    }
}

fn render_connections(snapshot: &ConnectionsSnapshot, _color: bool) -> String {
    format!(
        "{} open  ↑ {}  ↓ {}",
        snapshot.connections.len(),
        ByteSize(snapshot.upload_total),
        ByteSize(snapshot.download_total)
    )
}

fn render_log(line: &LogLine, color: bool) -> String {
    let level = format!("{:<7}", line.level);
    if !color {
        return format!("{level} {}", line.payload);
    }
    let level = match line.level.as_str() {
        "error" => level.red().to_string(),
        "warning" => level.yellow().to_string(),
        "debug" => level.dimmed().to_string(),
        _ => level.green().to_string(),
    };
    format!("{level} {}", line.payload)
}
