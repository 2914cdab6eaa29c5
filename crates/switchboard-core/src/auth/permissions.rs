//! Static tool -> permission table.
//!
//! Authorization for a tool name never depends on runtime state, so the
//! decision for any (key, tool) pair is reproducible from the audit trail.

use switchboard_types::auth::Permission;

/// Permissions a built-in tool requires. Unknown tools require nothing
/// here; the registry rejects them before authorization runs.
pub fn tool_permissions(tool_name: &str) -> Vec<Permission> {
    let permission = match tool_name {
        "send_message" => Permission::SEND_MESSAGES,
        "edit_message" => Permission::EDIT_MESSAGES,
        "delete_message" => Permission::DELETE_MESSAGES,
        "forward_message" => Permission::FORWARD_MESSAGES,
        "pin_message" | "unpin_message" => Permission::PIN_MESSAGES,
        "add_reaction" => Permission::ADD_REACTIONS,
        "get_message" | "list_messages" => Permission::READ_MESSAGES,
        "schedule_message" | "cancel_scheduled" | "pause_scheduled" | "resume_scheduled"
        | "update_scheduled" | "list_scheduled" => Permission::MANAGE_SCHEDULER,
        "batch_operation" | "get_batch_status" | "cancel_batch" | "pause_batch" | "resume_batch" => {
            Permission::MANAGE_BATCH
        }
        "list_bots" | "get_bot_stats" => Permission::READ_ANALYTICS,
        "start_bot" | "stop_bot" | "restart_bot" | "configure_bot" | "send_bot_command" => {
            Permission::ADMIN_BOTS
        }
        "get_audit_log" | "get_audit_stats" | "export_audit_log" => Permission::ADMIN_AUDIT_LOG,
        "create_api_key" | "revoke_api_key" | "list_api_keys" => Permission::ADMIN_API_KEYS,
        _ => return Vec::new(),
    };
    vec![permission]
}
