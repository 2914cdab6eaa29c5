//! Switchboard CLI and HTTP gateway entry point.
//!
//! Binary name: `sbd`
//!
//! Parses CLI arguments, opens the database and wires services, then
//! dispatches to a command handler or runs the server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tokio_util::sync::CancellationToken;

use cli::{AuditCommand, Cli, Commands, KeyCommand, ScheduleCommand};
use state::AppState;
use switchboard_observe::tracing_setup::{init_tracing_with, shutdown_tracing, verbosity_filter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "sbd", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing_with(verbosity_filter(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let state = AppState::init().await?;

    let result = run(&cli, state.clone()).await;
    state.shutdown().await;
    shutdown_tracing();
    result
}

async fn run(cli: &Cli, state: AppState) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Serve { port, host } => {
            let host = host.clone().unwrap_or_else(|| state.config.server.host.clone());
            let port = port.unwrap_or(state.config.server.port);
            serve(state, &host, port, cli.quiet).await?;
        }

        Commands::Key { action } => match action {
            KeyCommand::Create {
                role,
                permissions,
                expires_days,
                name,
            } => {
                cli::key::create_key(
                    &state,
                    role.clone(),
                    permissions.clone(),
                    *expires_days,
                    name.clone(),
                    cli.json,
                )
                .await?;
            }
            KeyCommand::List { all } => cli::key::list_keys(&state, *all, cli.json).await?,
            KeyCommand::Revoke { id } => cli::key::revoke_key(&state, id, cli.json).await?,
        },

        Commands::Audit { action } => match action {
            AuditCommand::Query {
                kind,
                key,
                tool,
                limit,
            } => {
                cli::audit::query(
                    &state,
                    kind.clone(),
                    key.clone(),
                    tool.clone(),
                    *limit,
                    cli.json,
                )
                .await?;
            }
            AuditCommand::Purge { days } => cli::audit::purge(&state, *days, cli.json).await?,
            AuditCommand::Export { path, format, kind } => {
                cli::audit::export(&state, path, format, kind.clone(), cli.json).await?;
            }
        },

        Commands::Schedule { action } => match action {
            ScheduleCommand::List { chat, all } => {
                cli::schedule::list(&state, *chat, *all, cli.json).await?;
            }
        },

        Commands::Status => cli::status::status(&state, cli.json).await?,

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn serve(state: AppState, host: &str, port: u16, quiet: bool) -> anyhow::Result<()> {
    // Print the bootstrap key once, on the run that creates it
    if let Some(created) = state.ensure_admin_key().await? {
        use secrecy::ExposeSecret;
        println!();
        println!(
            "  {} Admin API key generated (save this, it won't be shown again):",
            console::style("🔑").bold()
        );
        println!();
        println!(
            "  {}",
            console::style(created.secret.expose_secret()).yellow().bold()
        );
        println!();
    }

    state.register_builtin_bots().await?;

    let cancel = CancellationToken::new();
    let background = state.spawn_background(&cancel);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    if !quiet {
        println!(
            "  {} Switchboard listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
    }

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
