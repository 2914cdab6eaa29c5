//! Scheduled message listing.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use switchboard_types::schedule::{Recurrence, ScheduleStatus};

use crate::state::AppState;

pub async fn list(state: &AppState, chat: Option<i64>, all: bool, json: bool) -> Result<()> {
    let entries = state.scheduler.list(chat, !all).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  {} Nothing scheduled.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Chat").fg(Color::White),
        Cell::new("Next Send").fg(Color::White),
        Cell::new("Repeats").fg(Color::White),
        Cell::new("Sent").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Text").fg(Color::White),
    ]);

    for entry in &entries {
        let status_cell = match entry.status {
            ScheduleStatus::Pending => Cell::new("● pending").fg(Color::Green),
            ScheduleStatus::Paused => Cell::new("○ paused").fg(Color::Yellow),
            ScheduleStatus::Sent => Cell::new("✓ sent").fg(Color::DarkGrey),
            ScheduleStatus::Cancelled => Cell::new("◌ cancelled").fg(Color::DarkGrey),
            ScheduleStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
        };
        let repeats = match (entry.recurrence, entry.max_occurrences) {
            (Recurrence::None, _) => "once".to_string(),
            (r, Some(max)) => format!("{r} (max {max})"),
            (r, None) => r.to_string(),
        };
        let sent = entry.occurrences_sent.to_string();

        table.add_row(vec![
            Cell::new(entry.id).fg(Color::DarkGrey),
            Cell::new(entry.chat_id),
            Cell::new(entry.send_at.format("%Y-%m-%d %H:%M")),
            Cell::new(repeats),
            Cell::new(sent),
            status_cell,
            Cell::new(truncate(&entry.text, 40)),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate("short", 40), "short");
        let long = "ü".repeat(50);
        let cut = truncate(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }
}
