#[path = "helpers/mod.rs"]
mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assetup_bridge::{AssetRepository, RepositoryError, Script, ScriptedAssetRepository, TransferStream};
use assetup_contract::{BatchMetadata, BatchTarget, NotificationLevel, PipelineError};
use assetup_orchestrator::{BatchEvent, PipelineConfig};
use assetup_transfer::{TransferEvent, TransferFailure, TransferRequest};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use helpers::{file, scripted_pipeline, spawn_pipeline, wait_for_result};

#[tokio::test]
async fn test_all_items_succeed() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);
    let mut events = pipeline.handle.subscribe();

    let report = pipeline
        .handle
        .add_files(vec![
            file("hero.png", 1_000, "image/png"),
            file("banner.jpg", 2_000, "image/jpeg"),
            file("teaser.mp4", 5_000, "video/mp4"),
        ])
        .await
        .expect("add files");
    assert_eq!(report.admitted.len(), 3);

    let metadata = BatchMetadata {
        license: Some("CC-BY-4.0".to_string()),
        tags: vec!["launch".to_string()],
    };
    let started = pipeline
        .handle
        .start(BatchTarget::new("p1", "f1"), metadata.clone())
        .await
        .expect("start");
    assert_eq!(started.target.display_name(), "Launch Campaign / Hero Shots");

    let result = started.wait().await.expect("result");
    assert!(result.success);
    assert_eq!(result.completed_count, 3);
    assert_eq!(result.errored_count, 0);
    assert_eq!(result.cancelled_count, 0);
    assert_eq!(result.total_size_bytes, 8_000);

    let finished = wait_for_result(&mut events).await;
    assert_eq!(finished, result);

    let requests = assets.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|request| request.metadata == metadata));
    assert!(requests.iter().all(|request| request.target.folder_id == "f1"));

    let notifications = pipeline.feedback.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, NotificationLevel::Success);
    assert_eq!(pipeline.feedback.refreshed(), vec!["p1".to_string()]);
    assert_eq!(
        pipeline.feedback.navigations(),
        vec![("p1".to_string(), "f1".to_string())]
    );

    // The settled batch is discarded and a fresh one accepts files again.
    assert!(pipeline.handle.items().await.expect("items").is_empty());
    pipeline
        .handle
        .add_files(vec![file("hero.png", 1_000, "image/png")])
        .await
        .expect("add after finish");
}

#[tokio::test]
async fn test_partial_failure_is_reported() {
    let assets = Arc::new(
        ScriptedAssetRepository::new()
            .with_script("broken.png", Script::FailTransfer("connection reset".to_string())),
    );
    let pipeline = scripted_pipeline(&assets);

    pipeline
        .handle
        .add_files(vec![
            file("ok.png", 400, "image/png"),
            file("broken.png", 400, "image/png"),
        ])
        .await
        .expect("add files");
    let result = pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect("start")
        .wait()
        .await
        .expect("result");

    assert!(!result.success);
    assert_eq!(result.completed_count, 1);
    assert_eq!(result.errored_count, 1);
    assert_eq!(
        result.completed_count + result.errored_count + result.cancelled_count,
        2
    );

    let notifications = pipeline.feedback.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].0, NotificationLevel::Warning);
    assert_eq!(pipeline.feedback.refreshed(), vec!["p1".to_string()]);
    assert!(pipeline.feedback.navigations().is_empty());
}

#[tokio::test]
async fn test_finalize_failure_marks_item_errored() {
    let assets = Arc::new(
        ScriptedAssetRepository::new()
            .with_default(Script::FailFinalize("catalog unavailable".to_string())),
    );
    let pipeline = scripted_pipeline(&assets);

    pipeline
        .handle
        .add_files(vec![file("doc.pdf", 100, "application/pdf")])
        .await
        .expect("add files");
    let result = pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect("start")
        .wait()
        .await
        .expect("result");

    assert!(!result.success);
    assert_eq!(result.errored_count, 1);
    assert_eq!(pipeline.feedback.notifications()[0].0, NotificationLevel::Error);
    assert!(pipeline.feedback.refreshed().is_empty());
}

#[tokio::test]
async fn test_start_rejects_empty_batch() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);

    let err = pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect_err("empty batch");
    assert_eq!(err, PipelineError::validation("empty batch"));

    let snapshot = pipeline.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.total_count, 0);
    assert!(assets.requests().is_empty());
    assert!(pipeline.feedback.notifications().is_empty());
}

#[tokio::test]
async fn test_foreign_folder_aborts_start() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);
    pipeline
        .handle
        .add_files(vec![file("a.png", 10, "image/png")])
        .await
        .expect("add files");

    let err = pipeline
        .handle
        .start(BatchTarget::new("p1", "f2"), BatchMetadata::default())
        .await
        .expect_err("folder of another project");
    assert!(matches!(err, PipelineError::TargetNotFound(_)));

    let items = pipeline.handle.items().await.expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status.as_str(), "queued");
    assert!(assets.requests().is_empty());

    // Still editable after a rejected start.
    pipeline
        .handle
        .remove_item(&items[0].id)
        .await
        .expect("remove after rejected start");
}

#[tokio::test]
async fn test_batch_is_locked_while_uploading() {
    let assets = Arc::new(ScriptedAssetRepository::new().with_default(Script::StallUploading));
    let pipeline = scripted_pipeline(&assets);
    let report = pipeline
        .handle
        .add_files(vec![file("slow.mov", 1_000, "video/quicktime")])
        .await
        .expect("add files");
    let started = pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect("start");

    let handle = &pipeline.handle;
    assert_eq!(
        handle.add_files(vec![file("late.png", 5, "image/png")]).await,
        Err(PipelineError::BatchLocked)
    );
    assert_eq!(
        handle.remove_item(&report.admitted[0]).await,
        Err(PipelineError::BatchLocked)
    );
    assert_eq!(handle.clear().await, Err(PipelineError::BatchLocked));
    assert_eq!(
        handle
            .start(BatchTarget::root("p1"), BatchMetadata::default())
            .await
            .map(|_| ()),
        Err(PipelineError::BatchLocked)
    );

    handle.cancel(&report.admitted[0]).await.expect("cancel");
    let result = started.wait().await.expect("result");
    assert_eq!(result.cancelled_count, 1);
}

#[tokio::test]
async fn test_removal_before_start_releases_preview_once() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);
    let report = pipeline
        .handle
        .add_files(vec![
            file("a.png", 10, "image/png"),
            file("b.png", 20, "image/png"),
        ])
        .await
        .expect("add files");
    let preview = pipeline
        .handle
        .preview(&report.admitted[0])
        .await
        .expect("preview");
    assert_eq!(preview, Some("preview:1".to_string()));

    let before = pipeline.handle.snapshot().await.expect("snapshot");
    pipeline
        .handle
        .remove_item(&report.admitted[0])
        .await
        .expect("remove");
    let after = pipeline.handle.snapshot().await.expect("snapshot");

    assert_eq!(before.total_count, 2);
    assert_eq!(after.total_count, 1);
    assert_eq!(pipeline.previews.released(), vec!["preview:1".to_string()]);
    assert_eq!(pipeline.previews.live_count(), 0);
}

#[tokio::test]
async fn test_overall_percent_is_monotonic_while_uploading() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);
    let mut snapshots = Box::pin(pipeline.handle.snapshots());

    pipeline
        .handle
        .add_files(vec![
            file("one.png", 1_000, "image/png"),
            file("two.png", 3_000, "image/png"),
            file("three.png", 7_000, "image/png"),
        ])
        .await
        .expect("add files");
    let started = pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect("start");
    let batch_id = started.batch_id.clone();
    started.wait().await.expect("result");

    let mut last = 0;
    let mut seen = 0;
    while let Ok(Some(snapshot)) =
        tokio::time::timeout(Duration::from_millis(200), snapshots.next()).await
    {
        assert_eq!(snapshot.batch_id, batch_id);
        assert!(snapshot.overall_percent >= last, "percent went backwards");
        assert!(snapshot.throughput_bytes_per_sec >= 0.0);
        last = snapshot.overall_percent;
        seen += 1;
        if snapshot.is_settled() && snapshot.total_count == 3 {
            break;
        }
    }
    assert!(seen > 1);
    assert_eq!(last, 100);
}

#[tokio::test]
async fn test_item_events_follow_the_lifecycle() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);
    let mut events = pipeline.handle.subscribe();

    let report = pipeline
        .handle
        .add_files(vec![file("a.png", 800, "image/png")])
        .await
        .expect("add files");
    pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect("start")
        .wait()
        .await
        .expect("result");

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BatchEvent::ItemChanged { item, .. } = event {
            assert_eq!(item.id, report.admitted[0]);
            if statuses.last() != Some(&item.status) {
                statuses.push(item.status);
            }
        }
    }
    let names: Vec<_> = statuses.iter().map(|status| status.as_str()).collect();
    assert_eq!(names, vec!["uploading", "processing", "complete"]);
}

/// Tracks how many transfers are in flight at once.
struct CountingAssets {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AssetRepository for CountingAssets {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferStream, TransferFailure> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(self.active.clone());
        let size = request.size_bytes;

        let bytes = stream::once(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
            Ok::<_, TransferFailure>(TransferEvent::Progress { bytes_sent: size })
        });
        let finish: Vec<Result<TransferEvent, TransferFailure>> = vec![
            Ok(TransferEvent::Uploaded),
            Ok(TransferEvent::Finalized {
                asset_id: format!("asset-{}", request.item_id),
            }),
        ];
        Ok(bytes.chain(stream::iter(finish)).boxed())
    }

    async fn abort(&self, _item_id: &str) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let peak = Arc::new(AtomicUsize::new(0));
    let assets = Arc::new(CountingAssets {
        active: Arc::new(AtomicUsize::new(0)),
        peak: peak.clone(),
    });
    let config = PipelineConfig {
        max_concurrent_transfers: 2,
        ..PipelineConfig::default()
    };
    let pipeline = spawn_pipeline(assets, config);

    let files = (0..6)
        .map(|i| file(&format!("frame-{i}.png"), 100 + i, "image/png"))
        .collect();
    pipeline.handle.add_files(files).await.expect("add files");
    let result = pipeline
        .handle
        .start(BatchTarget::root("p1"), BatchMetadata::default())
        .await
        .expect("start")
        .wait()
        .await
        .expect("result");

    assert_eq!(result.completed_count, 6);
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
}

#[tokio::test]
async fn test_clear_releases_every_preview() {
    let assets = Arc::new(ScriptedAssetRepository::new());
    let pipeline = scripted_pipeline(&assets);
    let report = pipeline
        .handle
        .add_files(vec![
            file("a.png", 10, "image/png"),
            file("b.mp4", 20, "video/mp4"),
            file("c.txt", 30, "text/plain"),
        ])
        .await
        .expect("add files");
    for item_id in &report.admitted {
        pipeline.handle.preview(item_id).await.expect("preview");
    }
    assert_eq!(pipeline.previews.live_count(), 2);

    pipeline.handle.clear().await.expect("clear");

    assert!(pipeline.handle.items().await.expect("items").is_empty());
    assert_eq!(pipeline.previews.live_count(), 0);
    assert_eq!(pipeline.previews.released().len(), 2);
}
