//! API key management commands.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use secrecy::ExposeSecret;
use serde_json::json;

use switchboard_core::auth::CreateKeyRequest;
use switchboard_types::auth::{ApiKeyId, Permission};

use crate::state::AppState;

pub async fn create_key(
    state: &AppState,
    role: String,
    permissions: Vec<String>,
    expires_days: Option<u32>,
    name: String,
    json: bool,
) -> Result<()> {
    let custom_permissions = if permissions.is_empty() {
        None
    } else {
        Some(permissions.into_iter().map(Permission::new).collect())
    };
    let expires_at = expires_days.map(|days| Utc::now() + Duration::days(i64::from(days)));

    let created = state
        .access
        .create_key(CreateKeyRequest {
            name,
            role,
            custom_permissions,
            expires_at,
        })
        .await?;
    state
        .audit
        .record_system(
            "api_key_created",
            json!({ "key_id": created.key.id, "role": created.key.role, "by": "cli" }),
        )
        .await;
    state.audit.flush().await?;

    if json {
        let out = json!({
            "key": created.key,
            "secret": created.secret.expose_secret(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Created {} key {}",
        style("✓").green().bold(),
        style(created.key.role).cyan(),
        style(created.key.id).dim()
    );
    println!();
    println!("  Save this secret, it won't be shown again:");
    println!();
    println!("  {}", style(created.secret.expose_secret()).yellow().bold());
    println!();
    Ok(())
}

pub async fn list_keys(state: &AppState, include_revoked: bool, json: bool) -> Result<()> {
    let keys = state.access.list_keys(include_revoked).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!();
        println!(
            "  {} No API keys. Create one with: {}",
            style("i").blue().bold(),
            style("sbd key create --role admin").yellow()
        );
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Prefix").fg(Color::White),
        Cell::new("Role").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Last Used").fg(Color::White),
    ]);

    for key in &keys {
        let state_cell = if key.revoked {
            Cell::new("◌ revoked").fg(Color::DarkGrey)
        } else if key.expires_at.is_some_and(|at| at <= now) {
            Cell::new("○ expired").fg(Color::Yellow)
        } else {
            Cell::new("● active").fg(Color::Green)
        };
        let last_used = key
            .last_used_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());

        table.add_row(vec![
            Cell::new(key.id).fg(Color::DarkGrey),
            Cell::new(&key.name).fg(Color::Cyan),
            Cell::new(&key.key_prefix),
            Cell::new(key.role),
            state_cell,
            Cell::new(last_used).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn revoke_key(state: &AppState, id: &str, json: bool) -> Result<()> {
    let key_id: ApiKeyId = id
        .parse()
        .with_context(|| format!("'{id}' is not a key id"))?;

    state.access.revoke(&key_id).await?;
    state
        .audit
        .record_system("api_key_revoked", json!({ "key_id": key_id, "by": "cli" }))
        .await;
    state.audit.flush().await?;

    if json {
        println!("{}", json!({ "revoked": key_id }));
    } else {
        println!("  {} Revoked key {}", style("✓").green().bold(), style(key_id).dim());
    }
    Ok(())
}
