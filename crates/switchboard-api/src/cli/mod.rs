//! CLI command definitions for the `sbd` binary.
//!
//! Uses clap derive macros. Commands follow a noun-verb pattern
//! (e.g., `sbd key create`, `sbd audit query`).

pub mod audit;
pub mod key;
pub mod schedule;
pub mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Tool-call gateway for a fleet of chat bots.
#[derive(Parser)]
#[command(name = "sbd", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Also export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server, scheduler loop and audit flusher.
    Serve {
        /// Port to listen on (defaults to the configured port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (defaults to the configured host).
        #[arg(long)]
        host: Option<String>,
    },

    /// Manage API keys.
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },

    /// Inspect or prune the audit trail.
    Audit {
        #[command(subcommand)]
        action: AuditCommand,
    },

    /// Inspect scheduled messages.
    Schedule {
        #[command(subcommand)]
        action: ScheduleCommand,
    },

    /// System status dashboard.
    Status,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Issue a new API key. The secret is printed once.
    Create {
        /// Role: admin, developer, bot, read_only or custom.
        #[arg(long)]
        role: String,

        /// Explicit permission token (repeatable); replaces the role's set.
        #[arg(long = "permission", value_name = "PERMISSION")]
        permissions: Vec<String>,

        /// Days until the key expires.
        #[arg(long)]
        expires_days: Option<u32>,

        /// Human-readable label.
        #[arg(long, default_value = "cli")]
        name: String,
    },

    /// List API keys.
    #[command(alias = "ls")]
    List {
        /// Include revoked keys.
        #[arg(long)]
        all: bool,
    },

    /// Revoke a key permanently.
    Revoke {
        /// Key id.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum AuditCommand {
    /// Show recent audit records, newest first.
    Query {
        /// Event kind (e.g. tool_invoked, auth_event).
        #[arg(long)]
        kind: Option<String>,

        /// Actor key id.
        #[arg(long)]
        key: Option<String>,

        /// Tool name.
        #[arg(long)]
        tool: Option<String>,

        /// Maximum number of records.
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Delete records older than the retention window.
    Purge {
        /// Retention in days (defaults to the configured retention).
        #[arg(long)]
        days: Option<u32>,
    },

    /// Write matching records to a file, oldest first.
    Export {
        /// Destination file.
        #[arg(long)]
        path: PathBuf,

        /// Output format: json or jsonl.
        #[arg(long, default_value = "jsonl")]
        format: String,

        /// Event kind (e.g. tool_invoked, auth_event).
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommand {
    /// List scheduled messages.
    #[command(alias = "ls")]
    List {
        /// Only entries for this chat.
        #[arg(long)]
        chat: Option<i64>,

        /// Include sent, cancelled and failed entries.
        #[arg(long)]
        all: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn key_create_collects_permissions() {
        let cli = Cli::try_parse_from([
            "sbd",
            "key",
            "create",
            "--role",
            "custom",
            "--permission",
            "read:messages",
            "--permission",
            "send:messages",
            "--expires-days",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Key {
                action:
                    KeyCommand::Create {
                        role,
                        permissions,
                        expires_days,
                        name,
                    },
            } => {
                assert_eq!(role, "custom");
                assert_eq!(permissions, vec!["read:messages", "send:messages"]);
                assert_eq!(expires_days, Some(30));
                assert_eq!(name, "cli");
            }
            _ => panic!("expected key create"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sbd", "audit", "query", "--json", "-vv", "-n", "5"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Audit {
                action: AuditCommand::Query { limit: 5, .. }
            }
        ));
    }

    #[test]
    fn audit_export_defaults_to_jsonl() {
        let cli = Cli::try_parse_from(["sbd", "audit", "export", "--path", "/tmp/audit.jsonl"])
            .unwrap();
        match cli.command {
            Commands::Audit {
                action: AuditCommand::Export { path, format, kind },
            } => {
                assert_eq!(path, PathBuf::from("/tmp/audit.jsonl"));
                assert_eq!(format, "jsonl");
                assert!(kind.is_none());
            }
            _ => panic!("expected audit export"),
        }
        assert!(Cli::try_parse_from(["sbd", "audit", "export"]).is_err());
    }
}
