//! A batch operation with its parameters checked and resolved.

use switchboard_types::batch::{BatchParams, OperationKind};
use switchboard_types::error::BackendError;

use crate::backend::BoxMessagingBackend;

/// What to do with each target of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedOp {
    Delete { chat_id: i64 },
    Forward { from_chat_id: i64, to_chat_id: i64 },
    Pin { chat_id: i64 },
    Unpin { chat_id: i64 },
    React { chat_id: i64, emoji: String },
    /// Targets are chat ids.
    Send { text: String },
}

impl PreparedOp {
    /// Resolve an operation name and its parameters. The error explains why
    /// the job cannot start.
    pub fn prepare(operation: &str, params: &BatchParams) -> Result<Self, String> {
        let kind: OperationKind = operation.parse()?;
        let chat_id = || {
            params
                .chat_id
                .ok_or_else(|| format!("{kind} requires 'chat_id'"))
        };
        Ok(match kind {
            OperationKind::DeleteMessages => PreparedOp::Delete { chat_id: chat_id()? },
            OperationKind::ForwardMessages => PreparedOp::Forward {
                from_chat_id: chat_id()?,
                to_chat_id: params
                    .to_chat_id
                    .ok_or_else(|| format!("{kind} requires 'to_chat_id'"))?,
            },
            OperationKind::PinMessages => PreparedOp::Pin { chat_id: chat_id()? },
            OperationKind::UnpinMessages => PreparedOp::Unpin { chat_id: chat_id()? },
            OperationKind::AddReaction => PreparedOp::React {
                chat_id: chat_id()?,
                emoji: params
                    .emoji
                    .clone()
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| format!("{kind} requires 'emoji'"))?,
            },
            OperationKind::SendMessage => PreparedOp::Send {
                text: params
                    .text
                    .clone()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| format!("{kind} requires 'text'"))?,
            },
        })
    }

    /// Short name used in audit records.
    pub fn op_name(&self) -> &'static str {
        match self {
            PreparedOp::Delete { .. } => "delete_message",
            PreparedOp::Forward { .. } => "forward_message",
            PreparedOp::Pin { .. } => "pin_message",
            PreparedOp::Unpin { .. } => "unpin_message",
            PreparedOp::React { .. } => "add_reaction",
            PreparedOp::Send { .. } => "send_message",
        }
    }

    /// `(chat_id, message_id)` a target refers to.
    pub fn coordinates(&self, target: i64) -> (i64, Option<i64>) {
        match self {
            PreparedOp::Delete { chat_id }
            | PreparedOp::Pin { chat_id }
            | PreparedOp::Unpin { chat_id }
            | PreparedOp::React { chat_id, .. } => (*chat_id, Some(target)),
            PreparedOp::Forward { from_chat_id, .. } => (*from_chat_id, Some(target)),
            PreparedOp::Send { .. } => (target, None),
        }
    }

    pub async fn apply(&self, backend: &BoxMessagingBackend, target: i64) -> Result<(), BackendError> {
        match self {
            PreparedOp::Delete { chat_id } => backend.delete_message(*chat_id, target).await,
            PreparedOp::Forward {
                from_chat_id,
                to_chat_id,
            } => backend.forward_message(*from_chat_id, *to_chat_id, target).await,
            PreparedOp::Pin { chat_id } => backend.pin_message(*chat_id, target).await,
            PreparedOp::Unpin { chat_id } => backend.unpin_message(*chat_id, target).await,
            PreparedOp::React { chat_id, emoji } => backend.add_reaction(*chat_id, target, emoji).await,
            PreparedOp::Send { text } => backend.send_message(target, text).await.map(|_| ()),
        }
    }
}
