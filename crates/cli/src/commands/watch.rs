// Watch command - run the live pipeline until interrupted

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tidings_core::{
    ConnectionHealth, ConnectionState, NotificationCenter, PipelineConfig, PushPayload,
    SessionProvider, ToastNotification,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::output::OutputFormat;

/// Line printed for machine-readable output
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WatchEvent<'a> {
    Toast(&'a ToastNotification),
    Connection(&'a ConnectionHealth),
}

pub async fn run(
    config: PipelineConfig,
    session: Arc<dyn SessionProvider>,
    output: OutputFormat,
    quiet: bool,
    push_stdin: bool,
) -> Result<()> {
    if config.sse_url.is_empty() && !quiet {
        eprintln!("No --sse-url given; live stream disabled");
    } else if !session.is_authenticated() && !quiet {
        eprintln!("No --token given; live stream disabled until signed in");
    }

    let center = NotificationCenter::with_http(config, session)?;

    let (toast_tx, mut toast_rx) = mpsc::unbounded_channel();
    let _toasts = center.toasts().subscribe(move |snapshot| {
        let _ = toast_tx.send(snapshot.to_vec());
    });

    let push_rx = push_stdin.then(|| {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(read_push_lines(tx));
        rx
    });

    center.start(push_rx).await;
    if output.is_text() && !quiet {
        println!(
            "Watching notifications ({} in history, {} unread). Press Ctrl-C to stop.",
            center.history().len(),
            center.history().unread_count()
        );
    }

    let mut health = center.connection();
    let mut seen: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(snapshot) = toast_rx.recv() => {
                // Snapshots are newest first; print arrivals oldest first
                for toast in snapshot.iter().rev().filter(|t| !seen.contains(&t.id)) {
                    print_toast(output, toast)?;
                }
                seen = snapshot.into_iter().map(|t| t.id).collect();
            }
            changed = health.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = health.borrow_and_update().clone();
                if !quiet {
                    print_health(output, &current)?;
                }
            }
        }
    }

    center.shutdown().await;
    if output.is_text() && !quiet {
        println!(
            "Stopped. {} notifications in history, {} unread.",
            center.history().len(),
            center.history().unread_count()
        );
    }
    Ok(())
}

fn print_toast(output: OutputFormat, toast: &ToastNotification) -> Result<()> {
    if !output.is_text() {
        return output.print_value(&WatchEvent::Toast(toast));
    }

    let when = chrono::Local::now().format("%H:%M:%S");
    if toast.message.is_empty() {
        println!("[{}] {:<7} {}", when, toast.severity, toast.title);
    } else {
        println!(
            "[{}] {:<7} {} - {}",
            when, toast.severity, toast.title, toast.message
        );
    }
    Ok(())
}

fn print_health(output: OutputFormat, health: &ConnectionHealth) -> Result<()> {
    if !output.is_text() {
        return output.print_value(&WatchEvent::Connection(health));
    }

    match (health.state, &health.last_error) {
        (ConnectionState::Errored, Some(error)) => eprintln!(
            "Stream errored ({}), retry #{} scheduled",
            error, health.retry_count
        ),
        (state, _) => eprintln!("Stream {}", state),
    }
    Ok(())
}

/// Forward JSON-line push payloads from stdin until EOF
async fn read_push_lines(tx: mpsc::Sender<PushPayload>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read push payload from stdin");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<PushPayload>(&line) {
            Ok(payload) => {
                if tx.send(payload).await.is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed push payload"),
        }
    }
}
