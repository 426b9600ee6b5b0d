use std::sync::Arc;

use assetup_contract::{FolderId, ItemId, NotificationLevel, PreviewRef, ProjectId, SourceRef};
use assetup_transfer::{TransferEvent, TransferFailure, TransferRequest};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub id: FolderId,
    pub project_id: ProjectId,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("repository backend failure: {0}")]
    Backend(String),
}

/// Byte progress for one item, then `Uploaded`, then `Finalized`; or a failure.
pub type TransferStream = BoxStream<'static, Result<TransferEvent, TransferFailure>>;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectInfo>, RepositoryError>;
}

/// Implementations may look folders up by id alone; the returned `project_id` is what
/// callers must check ownership against.
#[async_trait]
pub trait FolderRepository: Send + Sync {
    async fn get_folder(
        &self,
        project_id: &str,
        folder_id: &str,
    ) -> Result<Option<FolderInfo>, RepositoryError>;
}

#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferStream, TransferFailure>;

    /// Abort an in-flight transfer. Called after the stream has been dropped.
    async fn abort(&self, item_id: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn show(&self, level: NotificationLevel, message: &str);
}

#[async_trait]
pub trait AssetListRefreshHook: Send + Sync {
    async fn touch(&self, project_id: &str);
}

#[async_trait]
pub trait NavigationIntent: Send + Sync {
    async fn go_to(&self, project_id: &str, folder_id: &str);
}

/// Allocates the transient preview handles shown next to image and video items.
pub trait PreviewAllocator: Send + Sync {
    fn allocate(
        &self,
        item_id: &ItemId,
        source: &SourceRef,
        mime_type: &str,
    ) -> Result<PreviewRef, RepositoryError>;

    fn release(&self, preview: PreviewRef);
}

#[derive(Clone)]
pub struct Collaborators {
    pub projects: Arc<dyn ProjectRepository>,
    pub folders: Arc<dyn FolderRepository>,
    pub assets: Arc<dyn AssetRepository>,
    pub notifications: Arc<dyn NotificationSink>,
    pub refresh: Arc<dyn AssetListRefreshHook>,
    pub navigation: Arc<dyn NavigationIntent>,
    pub previews: Arc<dyn PreviewAllocator>,
}
