//! Audit trail commands.

use std::path::Path;

use anyhow::{Result, anyhow};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::json;

use switchboard_types::audit::{AuditEventKind, AuditFilter, AuditStatus, ExportFormat};

use crate::state::AppState;

pub async fn query(
    state: &AppState,
    kind: Option<String>,
    key: Option<String>,
    tool: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let filter = AuditFilter {
        kind: kind
            .map(|k| k.parse::<AuditEventKind>())
            .transpose()
            .map_err(|e| anyhow!(e))?,
        key_id: key
            .map(|k| k.parse())
            .transpose()
            .map_err(|e| anyhow!("invalid key id: {e}"))?,
        tool_name: tool,
        ..Default::default()
    };

    let events = state.audit.query(&filter, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!();
        println!("  {} No matching audit records.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("Kind").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Tool").fg(Color::White),
        Cell::new("Actor").fg(Color::White),
        Cell::new("ms").fg(Color::White),
    ]);

    for event in &events {
        let status_cell = match event.status {
            AuditStatus::Success | AuditStatus::Granted => {
                Cell::new(event.status).fg(Color::Green)
            }
            AuditStatus::Failure | AuditStatus::Denied => Cell::new(event.status).fg(Color::Red),
            AuditStatus::Started => Cell::new(event.status).fg(Color::DarkGrey),
        };
        table.add_row(vec![
            Cell::new(event.timestamp.format("%Y-%m-%d %H:%M:%S")).fg(Color::DarkGrey),
            Cell::new(event.kind).fg(Color::Cyan),
            status_cell,
            Cell::new(event.tool_name.as_deref().unwrap_or("-")),
            Cell::new(
                event
                    .actor_key_id
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "-".into()),
            )
            .fg(Color::DarkGrey),
            Cell::new(
                event
                    .duration_ms
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
            ),
        ]);
    }

    println!();
    println!("{table}");
    println!(
        "  {}",
        style(format!("{} record(s), newest first", events.len())).dim()
    );
    println!();
    Ok(())
}

pub async fn purge(state: &AppState, days: Option<u32>, json: bool) -> Result<()> {
    let retention = match days {
        Some(days) => chrono::Duration::days(i64::from(days)),
        None => state.settings.audit_retention,
    };
    let removed = state.audit.purge_older_than(retention).await?;
    state.audit.flush().await?;

    if json {
        println!(
            "{}",
            json!({ "removed": removed, "retention_days": retention.num_days() })
        );
    } else {
        println!(
            "  {} Removed {} record(s) older than {} day(s)",
            style("✓").green().bold(),
            style(removed).bold(),
            retention.num_days()
        );
    }
    Ok(())
}

pub async fn export(
    state: &AppState,
    path: &Path,
    format: &str,
    kind: Option<String>,
    json: bool,
) -> Result<()> {
    let format = format.parse::<ExportFormat>().map_err(|e| anyhow!(e))?;
    let filter = AuditFilter {
        kind: kind
            .map(|k| k.parse::<AuditEventKind>())
            .transpose()
            .map_err(|e| anyhow!(e))?,
        ..Default::default()
    };
    let count = state.audit.export(&filter, path, format).await?;
    state.audit.flush().await?;

    if json {
        println!(
            "{}",
            json!({ "path": path.display().to_string(), "format": format.to_string(), "count": count })
        );
    } else {
        println!(
            "  {} Exported {} record(s) to {}",
            style("✓").green().bold(),
            style(count).bold(),
            style(path.display()).cyan()
        );
    }
    Ok(())
}
