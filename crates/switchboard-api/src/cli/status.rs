//! System status dashboard command.

use anyhow::Result;
use console::style;

use switchboard_types::audit::AuditFilter;

use crate::state::AppState;

/// Display system status dashboard.
///
/// Shows key counts, scheduler backlog, audit volume and bot status.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let keys = state.access.list_keys(true).await;
    let active_keys = state.access.active_key_count().await;
    let revoked_keys = keys.iter().filter(|k| k.revoked).count();
    let scheduled = state.scheduler.active_count().await?;
    let audit = state.audit.statistics(&AuditFilter::default()).await?;
    let bots = state.bots.system_status();

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "keys": {
                "total": keys.len(),
                "active": active_keys,
                "revoked": revoked_keys,
            },
            "scheduled_active": scheduled,
            "audit": audit,
            "bots": bots,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Switchboard v{}",
        style("⚡").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!();

    println!("  {}", style("── API keys ──").dim());
    println!("  Total:    {}", style(keys.len()).bold());
    println!("  Active:   {}", style(active_keys).green());
    if revoked_keys > 0 {
        println!("  Revoked:  {}", style(revoked_keys).dim());
    }
    println!();

    println!("  {}", style("── Scheduler ──").dim());
    println!("  Pending or paused: {}", style(scheduled).bold());
    println!();

    println!("  {}", style("── Audit ──").dim());
    println!("  Records:  {}", format_count(audit.total_events));
    println!("  Failures: {}", style(audit.failures).red());
    println!("  Denials:  {}", style(audit.denials).yellow());
    if let Some(avg) = audit.avg_duration_ms {
        println!("  Avg tool duration: {avg:.1} ms");
    }
    println!();

    // Bots only run inside `sbd serve`; this reflects the local process.
    println!("  {}", style("── Bots ──").dim());
    println!(
        "  Registered: {}  Running: {}",
        bots.total_bots, bots.running_bots
    );
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}

fn format_count(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}
