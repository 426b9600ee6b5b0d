pub mod item;

use assetup_contract::{BatchMetadata, ItemId, PipelineError, ResolvedTarget, SourceRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use item::{ItemView, TransitionError, UploadItem};

/// Everything an asset repository needs to move one item's bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub item_id: ItemId,
    pub source: SourceRef,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub target: ResolvedTarget,
    pub metadata: BatchMetadata,
}

impl TransferRequest {
    pub fn for_item(item: &UploadItem, target: &ResolvedTarget, metadata: &BatchMetadata) -> Self {
        Self {
            item_id: item.id.clone(),
            source: item.source.clone(),
            name: item.name.clone(),
            size_bytes: item.size_bytes,
            mime_type: item.mime_type.clone(),
            target: target.clone(),
            metadata: metadata.clone(),
        }
    }
}

/// Events a transfer stream yields, in order: any number of `Progress`, one `Uploaded`,
/// then one `Finalized`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TransferEvent {
    Progress { bytes_sent: u64 },
    Uploaded,
    Finalized { asset_id: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferFailure {
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("finalize rejected: {0}")]
    Finalize(String),
}

impl From<TransferFailure> for PipelineError {
    fn from(failure: TransferFailure) -> Self {
        match failure {
            TransferFailure::Transfer(message) => PipelineError::Transfer(message),
            TransferFailure::Finalize(message) => PipelineError::Finalize(message),
        }
    }
}

/// Whole percent of `size_bytes` covered by `bytes_sent`, clamped to 100.
pub fn percent_of(bytes_sent: u64, size_bytes: u64) -> u8 {
    if size_bytes == 0 {
        return 100;
    }
    let sent = bytes_sent.min(size_bytes) as u128;
    ((sent * 100) / size_bytes as u128) as u8
}
