// Notification history commands
//
// These talk to the durable store directly so that a failed request is
// reported (and exits non-zero) instead of being absorbed optimistically.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tidings_core::{
    HttpNotificationStore, NotificationRecord, NotificationStore, NotifyError, PipelineConfig,
    SessionProvider,
};

use crate::output::{print_table_header, print_table_row, OutputFormat};

pub fn store(config: &PipelineConfig, session: Arc<dyn SessionProvider>) -> HttpNotificationStore {
    HttpNotificationStore::new(&config.api_url).with_session(session)
}

#[derive(Debug, Serialize)]
struct MutationResult {
    action: &'static str,
    updated: usize,
    failed: Vec<String>,
}

pub async fn list(store: &dyn NotificationStore, output: OutputFormat) -> Result<()> {
    let records = store
        .list()
        .await
        .context("Failed to fetch notification history")?;

    if !output.is_text() {
        return output.print_value(&records);
    }

    if records.is_empty() {
        println!("No notifications");
        return Ok(());
    }

    print_table_header(&[("ID", 24), ("TITLE", 30), ("READ", 4), ("WHEN", 20)]);
    for record in &records {
        print_table_row(&[
            (&record.id, 24),
            (&record.title, 30),
            (if record.read { "yes" } else { "no" }, 4),
            (&record.occurred_at.format("%Y-%m-%d %H:%M:%S").to_string(), 20),
        ]);
    }
    let unread = records.iter().filter(|r| !r.read).count();
    println!("\n{} notifications, {} unread", records.len(), unread);

    Ok(())
}

pub async fn mark_read(
    store: &dyn NotificationStore,
    output: OutputFormat,
    quiet: bool,
    id: &str,
) -> Result<()> {
    store.mark_read(id).await.map_err(|e| match e {
        NotifyError::Api { status: 404, .. } => anyhow::anyhow!("Notification not found: {}", id),
        e => anyhow::Error::new(e).context(format!("Failed to mark {} as read", id)),
    })?;

    report(
        output,
        quiet,
        MutationResult {
            action: "mark_read",
            updated: 1,
            failed: Vec::new(),
        },
    )
}

pub async fn mark_all_read(
    store: &dyn NotificationStore,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let unread: Vec<NotificationRecord> = store
        .list()
        .await
        .context("Failed to fetch notification history")?
        .into_iter()
        .filter(|r| !r.read)
        .collect();

    let mut result = MutationResult {
        action: "mark_all_read",
        updated: 0,
        failed: Vec::new(),
    };
    for record in &unread {
        match store.mark_read(&record.id).await {
            Ok(()) => result.updated += 1,
            Err(e) => {
                tracing::warn!(notification_id = %record.id, error = %e, "Failed to mark read");
                result.failed.push(record.id.clone());
            }
        }
    }

    let failed = result.failed.len();
    report(output, quiet, result)?;
    if failed > 0 {
        anyhow::bail!("{} notifications could not be marked read", failed);
    }
    Ok(())
}

pub async fn clear(store: &dyn NotificationStore, output: OutputFormat, quiet: bool) -> Result<()> {
    store
        .clear()
        .await
        .context("Failed to clear notification history")?;

    report(
        output,
        quiet,
        MutationResult {
            action: "clear",
            updated: 0,
            failed: Vec::new(),
        },
    )
}

fn report(output: OutputFormat, quiet: bool, result: MutationResult) -> Result<()> {
    if !output.is_text() {
        return output.print_value(&result);
    }
    if quiet {
        return Ok(());
    }
    match result.action {
        "clear" => println!("Notification history cleared"),
        "mark_read" => println!("Marked as read"),
        _ => println!("Marked {} notifications as read", result.updated),
    }
    Ok(())
}
