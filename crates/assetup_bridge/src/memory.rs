use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use assetup_contract::{new_id, FolderId, ItemId, NotificationLevel, PreviewRef, ProjectId, SourceRef};
use assetup_transfer::{TransferEvent, TransferFailure, TransferRequest};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::bridge::{
    AssetListRefreshHook, AssetRepository, FolderInfo, FolderRepository, NavigationIntent,
    NotificationSink, PreviewAllocator, ProjectInfo, ProjectRepository, RepositoryError,
    TransferStream,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    projects: Mutex<HashMap<ProjectId, ProjectInfo>>,
    folders: Mutex<HashMap<FolderId, FolderInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(self, id: &str, name: &str) -> Self {
        lock(&self.projects).insert(
            id.to_string(),
            ProjectInfo {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn with_folder(self, id: &str, project_id: &str, name: &str) -> Self {
        lock(&self.folders).insert(
            id.to_string(),
            FolderInfo {
                id: id.to_string(),
                project_id: project_id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl ProjectRepository for InMemoryCatalog {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectInfo>, RepositoryError> {
        Ok(lock(&self.projects).get(project_id).cloned())
    }
}

#[async_trait]
impl FolderRepository for InMemoryCatalog {
    async fn get_folder(
        &self,
        _project_id: &str,
        folder_id: &str,
    ) -> Result<Option<FolderInfo>, RepositoryError> {
        Ok(lock(&self.folders).get(folder_id).cloned())
    }
}

/// Outcome a [`ScriptedAssetRepository`] plays back for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Succeed,
    FailTransfer(String),
    FailFinalize(String),
    /// Reports half of the bytes, then waits until aborted.
    StallUploading,
    /// Sends every byte, then never acknowledges finalize.
    StallProcessing,
}

/// Asset repository that replays a per-file script instead of moving bytes.
#[derive(Debug)]
pub struct ScriptedAssetRepository {
    default_script: Script,
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<TransferRequest>>,
    aborted: Mutex<Vec<ItemId>>,
    steps: u64,
}

impl Default for ScriptedAssetRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAssetRepository {
    pub fn new() -> Self {
        Self {
            default_script: Script::Succeed,
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            aborted: Mutex::new(Vec::new()),
            steps: 4,
        }
    }

    pub fn with_script(self, file_name: &str, script: Script) -> Self {
        lock(&self.scripts).insert(file_name.to_string(), script);
        self
    }

    pub fn with_default(mut self, script: Script) -> Self {
        self.default_script = script;
        self
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        lock(&self.requests).clone()
    }

    pub fn aborted(&self) -> Vec<ItemId> {
        lock(&self.aborted).clone()
    }

    fn progress_events(&self, size_bytes: u64) -> Vec<Result<TransferEvent, TransferFailure>> {
        (1..=self.steps)
            .map(|step| {
                let bytes_sent = if step == self.steps {
                    size_bytes
                } else {
                    size_bytes / self.steps * step
                };
                Ok(TransferEvent::Progress { bytes_sent })
            })
            .collect()
    }
}

#[async_trait]
impl AssetRepository for ScriptedAssetRepository {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferStream, TransferFailure> {
        let script = lock(&self.scripts)
            .get(&request.name)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        let size = request.size_bytes;
        lock(&self.requests).push(request);

        let stream = match script {
            Script::Succeed => {
                let mut events = self.progress_events(size);
                events.push(Ok(TransferEvent::Uploaded));
                events.push(Ok(TransferEvent::Finalized { asset_id: new_id() }));
                stream::iter(events).boxed()
            }
            Script::FailTransfer(message) => stream::iter(vec![
                Ok(TransferEvent::Progress {
                    bytes_sent: size / 2,
                }),
                Err(TransferFailure::Transfer(message)),
            ])
            .boxed(),
            Script::FailFinalize(message) => {
                let mut events = self.progress_events(size);
                events.push(Ok(TransferEvent::Uploaded));
                events.push(Err(TransferFailure::Finalize(message)));
                stream::iter(events).boxed()
            }
            Script::StallUploading => stream::iter(vec![Ok(TransferEvent::Progress {
                bytes_sent: size / 2,
            })])
            .chain(stream::pending())
            .boxed(),
            Script::StallProcessing => {
                let mut events = self.progress_events(size);
                events.push(Ok(TransferEvent::Uploaded));
                stream::iter(events).chain(stream::pending()).boxed()
            }
        };
        Ok(stream)
    }

    async fn abort(&self, item_id: &str) -> Result<(), RepositoryError> {
        lock(&self.aborted).push(item_id.to_string());
        Ok(())
    }
}

/// Records every notification, refresh and navigation it receives.
#[derive(Debug, Default)]
pub struct RecordingFeedback {
    notifications: Mutex<Vec<(NotificationLevel, String)>>,
    refreshed: Mutex<Vec<ProjectId>>,
    navigations: Mutex<Vec<(ProjectId, FolderId)>>,
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(NotificationLevel, String)> {
        lock(&self.notifications).clone()
    }

    pub fn refreshed(&self) -> Vec<ProjectId> {
        lock(&self.refreshed).clone()
    }

    pub fn navigations(&self) -> Vec<(ProjectId, FolderId)> {
        lock(&self.navigations).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingFeedback {
    async fn show(&self, level: NotificationLevel, message: &str) {
        lock(&self.notifications).push((level, message.to_string()));
    }
}

#[async_trait]
impl AssetListRefreshHook for RecordingFeedback {
    async fn touch(&self, project_id: &str) {
        lock(&self.refreshed).push(project_id.to_string());
    }
}

#[async_trait]
impl NavigationIntent for RecordingFeedback {
    async fn go_to(&self, project_id: &str, folder_id: &str) {
        lock(&self.navigations).push((project_id.to_string(), folder_id.to_string()));
    }
}

/// Feedback collaborators for headless runs: everything goes to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingFeedback;

#[async_trait]
impl NotificationSink for LoggingFeedback {
    async fn show(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Warning | NotificationLevel::Error => {
                warn!(level = ?level, message = %message, "upload notification")
            }
            _ => info!(level = ?level, message = %message, "upload notification"),
        }
    }
}

#[async_trait]
impl AssetListRefreshHook for LoggingFeedback {
    async fn touch(&self, project_id: &str) {
        info!(project_id = %project_id, "asset listing invalidated");
    }
}

#[async_trait]
impl NavigationIntent for LoggingFeedback {
    async fn go_to(&self, project_id: &str, folder_id: &str) {
        info!(project_id = %project_id, folder_id = %folder_id, "navigation requested");
    }
}

/// Hands out `preview:<n>` handles and tracks which are still live.
#[derive(Debug, Default)]
pub struct SequentialPreviews {
    next: AtomicU64,
    live: Mutex<HashSet<String>>,
    released: Mutex<Vec<String>>,
}

impl SequentialPreviews {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocated_count(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    pub fn released(&self) -> Vec<String> {
        lock(&self.released).clone()
    }
}

impl PreviewAllocator for SequentialPreviews {
    fn allocate(
        &self,
        _item_id: &ItemId,
        _source: &SourceRef,
        _mime_type: &str,
    ) -> Result<PreviewRef, RepositoryError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = format!("preview:{n}");
        lock(&self.live).insert(handle.clone());
        Ok(PreviewRef::new(handle))
    }

    fn release(&self, preview: PreviewRef) {
        let handle = preview.as_str().to_string();
        if !lock(&self.live).remove(&handle) {
            warn!(preview = %handle, "release of unknown preview handle");
        }
        lock(&self.released).push(handle);
    }
}
