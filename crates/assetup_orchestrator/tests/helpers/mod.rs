#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use assetup_bridge::{
    AssetRepository, Collaborators, InMemoryCatalog, RecordingFeedback, ScriptedAssetRepository,
    SequentialPreviews,
};
use assetup_contract::{ItemId, ItemStatus, RawFile, SourceRef, UploadResult};
use assetup_orchestrator::{BatchEvent, OrchestratorHandle, PipelineConfig, UploadOrchestrator};
use tokio::sync::broadcast;

pub struct TestPipeline {
    pub handle: OrchestratorHandle,
    pub feedback: Arc<RecordingFeedback>,
    pub previews: Arc<SequentialPreviews>,
}

pub fn catalog() -> Arc<InMemoryCatalog> {
    Arc::new(
        InMemoryCatalog::new()
            .with_project("p1", "Launch Campaign")
            .with_project("p2", "Archive")
            .with_folder("f1", "p1", "Hero Shots")
            .with_folder("f2", "p2", "Old Renders"),
    )
}

pub fn spawn_pipeline(assets: Arc<dyn AssetRepository>, config: PipelineConfig) -> TestPipeline {
    let catalog = catalog();
    let feedback = Arc::new(RecordingFeedback::new());
    let previews = Arc::new(SequentialPreviews::new());
    let collaborators = Collaborators {
        projects: catalog.clone(),
        folders: catalog,
        assets,
        notifications: feedback.clone(),
        refresh: feedback.clone(),
        navigation: feedback.clone(),
        previews: previews.clone(),
    };

    TestPipeline {
        handle: UploadOrchestrator::spawn(config, collaborators),
        feedback,
        previews,
    }
}

pub fn scripted_pipeline(assets: &Arc<ScriptedAssetRepository>) -> TestPipeline {
    spawn_pipeline(assets.clone(), PipelineConfig::default())
}

pub fn file(name: &str, size: u64, mime: &str) -> RawFile {
    RawFile::new(SourceRef::new(format!("mem://{name}")), name, size, mime)
}

/// Waits for the given item to be reported in `status`.
pub async fn wait_for_status(
    events: &mut broadcast::Receiver<BatchEvent>,
    item_id: &ItemId,
    status: ItemStatus,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(BatchEvent::ItemChanged { item, .. })
                    if &item.id == item_id && item.status == status =>
                {
                    return;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("item never reached expected status");
}

pub async fn wait_for_result(events: &mut broadcast::Receiver<BatchEvent>) -> UploadResult {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(BatchEvent::Finished(result)) => return result,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("batch never finished")
}
