use thiserror::Error;

use crate::model::{ItemId, ItemStatus};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("batch is locked while an upload is running")]
    BatchLocked,
    #[error("upload target not found: {0}")]
    TargetNotFound(String),
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("finalize rejected: {0}")]
    Finalize(String),
    #[error("unknown item {0}")]
    UnknownItem(ItemId),
    #[error("item {item_id} cannot move from {from} to {to}")]
    InvalidTransition {
        item_id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
    #[error("collaborator failure: {0}")]
    Collaborator(String),
    #[error("orchestrator is no longer running")]
    Closed,
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
