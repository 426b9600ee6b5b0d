//! The single owner of an upload batch.
//!
//! All mutation goes through one actor task: callers talk to it with
//! [`OrchestratorHandle`] commands, transfer workers report back over an internal
//! channel, and observers follow along through [`BatchEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;

use assetup_bridge::{AssetRepository, Collaborators};
use assetup_contract::{
    BatchId, BatchMetadata, BatchTarget, ItemId, ItemStatus, PipelineError, ProgressSnapshot,
    RawFile, ResolvedTarget, UploadResult,
};
use assetup_transfer::{percent_of, ItemView, TransferEvent, TransferFailure, TransferRequest};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use crate::batch::UploadBatch;
use crate::config::PipelineConfig;
use crate::intake::{FileIntake, IntakeReport};
use crate::progress::ProgressAggregator;
use crate::reporter::CompletionReporter;
use crate::target::TargetResolver;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "event", content = "data")]
pub enum BatchEvent {
    Snapshot(ProgressSnapshot),
    ItemChanged { batch_id: BatchId, item: ItemView },
    Finished(UploadResult),
}

/// Returned by a successful start; resolves to the batch's terminal result.
#[derive(Debug)]
pub struct StartedBatch {
    pub batch_id: BatchId,
    pub target: ResolvedTarget,
    result: oneshot::Receiver<UploadResult>,
}

impl StartedBatch {
    pub async fn wait(self) -> Result<UploadResult, PipelineError> {
        self.result.await.map_err(|_| PipelineError::Closed)
    }
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

enum Command {
    AddFiles {
        files: Vec<RawFile>,
        reply: Reply<IntakeReport>,
    },
    RemoveItem {
        item_id: ItemId,
        reply: Reply<()>,
    },
    Clear {
        reply: Reply<()>,
    },
    Start {
        target: BatchTarget,
        metadata: BatchMetadata,
        reply: Reply<StartedBatch>,
    },
    Cancel {
        item_id: ItemId,
        reply: Reply<()>,
    },
    Preview {
        item_id: ItemId,
        reply: Reply<Option<String>>,
    },
    Items {
        reply: Reply<Vec<ItemView>>,
    },
    Snapshot {
        reply: Reply<ProgressSnapshot>,
    },
}

enum WorkerEvent {
    Progress {
        item_id: ItemId,
        bytes_sent: u64,
    },
    Uploaded {
        item_id: ItemId,
    },
    Finished {
        item_id: ItemId,
        outcome: Result<String, TransferFailure>,
    },
    Aborted {
        item_id: ItemId,
    },
}

/// Cloneable front door to the orchestrator actor.
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<BatchEvent>,
}

impl OrchestratorHandle {
    pub async fn add_files(&self, files: Vec<RawFile>) -> Result<IntakeReport, PipelineError> {
        self.request(|reply| Command::AddFiles { files, reply }).await
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<(), PipelineError> {
        let item_id = item_id.to_string();
        self.request(|reply| Command::RemoveItem { item_id, reply })
            .await
    }

    pub async fn clear(&self) -> Result<(), PipelineError> {
        self.request(|reply| Command::Clear { reply }).await
    }

    pub async fn start(
        &self,
        target: BatchTarget,
        metadata: BatchMetadata,
    ) -> Result<StartedBatch, PipelineError> {
        self.request(|reply| Command::Start {
            target,
            metadata,
            reply,
        })
        .await
    }

    /// Resolves once the item is `cancelled`. For an in-flight item that is after the
    /// asset repository acknowledged the abort.
    pub async fn cancel(&self, item_id: &str) -> Result<(), PipelineError> {
        let item_id = item_id.to_string();
        self.request(|reply| Command::Cancel { item_id, reply }).await
    }

    /// First call for an image or video allocates its preview.
    pub async fn preview(&self, item_id: &str) -> Result<Option<String>, PipelineError> {
        let item_id = item_id.to_string();
        self.request(|reply| Command::Preview { item_id, reply }).await
    }

    pub async fn items(&self) -> Result<Vec<ItemView>, PipelineError> {
        self.request(|reply| Command::Items { reply }).await
    }

    pub async fn snapshot(&self) -> Result<ProgressSnapshot, PipelineError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// Progress snapshots only. Lagged receivers skip ahead to the latest state.
    pub fn snapshots(&self) -> impl Stream<Item = ProgressSnapshot> {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| async move {
            match event {
                Ok(BatchEvent::Snapshot(snapshot)) => Some(snapshot),
                _ => None,
            }
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, PipelineError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PipelineError::Closed)?;
        response.await.map_err(|_| PipelineError::Closed)?
    }
}

pub struct UploadOrchestrator;

impl UploadOrchestrator {
    /// Spawns the actor on the current tokio runtime. It runs until every handle is
    /// dropped and no batch is uploading.
    pub fn spawn(config: PipelineConfig, collaborators: Collaborators) -> OrchestratorHandle {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (worker_tx, worker_rx) = mpsc::channel(config.event_buffer.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        let actor = OrchestratorActor {
            resolver: TargetResolver::new(
                collaborators.projects.clone(),
                collaborators.folders.clone(),
            ),
            reporter: CompletionReporter::new(
                collaborators.notifications.clone(),
                collaborators.refresh.clone(),
                collaborators.navigation.clone(),
            ),
            aggregator: ProgressAggregator::new(),
            batch: UploadBatch::new(),
            run: None,
            worker_tx,
            events: events.clone(),
            config,
            collaborators,
        };
        tokio::spawn(actor.run(command_rx, worker_rx));

        OrchestratorHandle {
            commands: command_tx,
            events,
        }
    }
}

struct ActiveRun {
    cancels: HashMap<ItemId, oneshot::Sender<()>>,
    cancel_replies: HashMap<ItemId, Reply<()>>,
    result: Option<oneshot::Sender<UploadResult>>,
}

struct OrchestratorActor {
    config: PipelineConfig,
    collaborators: Collaborators,
    resolver: TargetResolver,
    reporter: CompletionReporter,
    aggregator: ProgressAggregator,
    batch: UploadBatch,
    run: Option<ActiveRun>,
    worker_tx: mpsc::Sender<WorkerEvent>,
    events: broadcast::Sender<BatchEvent>,
}

impl OrchestratorActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut workers: mpsc::Receiver<WorkerEvent>,
    ) {
        let mut accepting = true;
        loop {
            tokio::select! {
                command = commands.recv(), if accepting => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        accepting = false;
                        debug!("all orchestrator handles dropped");
                    }
                },
                Some(event) = workers.recv() => self.handle_worker_event(event).await,
            }
            if !accepting && self.run.is_none() {
                break;
            }
        }
        self.discard_batch();
        debug!("orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::AddFiles { files, reply } => {
                let outcome = FileIntake::admit(&mut self.batch, files);
                if outcome.is_ok() {
                    self.publish_snapshot();
                }
                let _ = reply.send(outcome);
            }
            Command::RemoveItem { item_id, reply } => {
                let outcome = FileIntake::remove(
                    &mut self.batch,
                    &item_id,
                    self.collaborators.previews.as_ref(),
                );
                if outcome.is_ok() {
                    debug!(item_id = %item_id, "item removed");
                    self.publish_snapshot();
                }
                let _ = reply.send(outcome);
            }
            Command::Clear { reply } => {
                let outcome = if self.batch.is_uploading() {
                    Err(PipelineError::BatchLocked)
                } else {
                    self.discard_batch();
                    self.publish_snapshot();
                    Ok(())
                };
                let _ = reply.send(outcome);
            }
            Command::Start {
                target,
                metadata,
                reply,
            } => {
                let outcome = self.start(target, metadata).await;
                if let Err(err) = &outcome {
                    warn!(batch_id = %self.batch.id(), error = %err, "batch start rejected");
                }
                let _ = reply.send(outcome);
            }
            Command::Cancel { item_id, reply } => self.cancel(item_id, reply),
            Command::Preview { item_id, reply } => {
                let outcome = FileIntake::preview(
                    &mut self.batch,
                    &item_id,
                    self.collaborators.previews.as_ref(),
                );
                let _ = reply.send(outcome);
            }
            Command::Items { reply } => {
                let _ = reply.send(Ok(self.batch.views()));
            }
            Command::Snapshot { reply } => {
                let snapshot = self.aggregator.snapshot(&self.batch, Instant::now());
                let _ = reply.send(Ok(snapshot));
            }
        }
    }

    async fn start(
        &mut self,
        target: BatchTarget,
        metadata: BatchMetadata,
    ) -> Result<StartedBatch, PipelineError> {
        if self.batch.is_uploading() {
            return Err(PipelineError::BatchLocked);
        }
        if self.batch.is_empty() {
            return Err(PipelineError::validation("empty batch"));
        }
        if self.batch.count(ItemStatus::Queued) == 0 {
            return Err(PipelineError::validation("no queued items"));
        }

        let resolved = self.resolver.resolve(&target).await?;
        self.batch.lock(resolved.clone(), metadata.clone());
        self.aggregator.start(Instant::now());

        let mut requests = Vec::new();
        for item in self.batch.items_mut() {
            if item.status() == ItemStatus::Queued {
                item.admit()?;
                requests.push(TransferRequest::for_item(item, &resolved, &metadata));
            }
        }

        let limit = self
            .config
            .concurrency_limit()
            .map(|permits| Arc::new(Semaphore::new(permits)));
        let mut cancels = HashMap::new();
        for request in requests {
            let item_id = request.item_id.clone();
            let (cancel_tx, cancel_rx) = oneshot::channel();
            cancels.insert(item_id.clone(), cancel_tx);
            tokio::spawn(run_transfer(
                self.collaborators.assets.clone(),
                request,
                limit.clone(),
                cancel_rx,
                self.worker_tx.clone(),
            ));
            self.publish_item(&item_id);
        }

        let (result_tx, result_rx) = oneshot::channel();
        self.run = Some(ActiveRun {
            cancels,
            cancel_replies: HashMap::new(),
            result: Some(result_tx),
        });

        info!(
            batch_id = %self.batch.id(),
            items = self.batch.count(ItemStatus::Uploading),
            target = %resolved.display_name(),
            max_concurrent = self.config.max_concurrent_transfers,
            "batch upload started"
        );
        self.publish_snapshot();
        self.finish_if_settled().await;

        Ok(StartedBatch {
            batch_id: self.batch.id().to_string(),
            target: resolved,
            result: result_rx,
        })
    }

    fn cancel(&mut self, item_id: ItemId, reply: Reply<()>) {
        let Some(item) = self.batch.item_mut(&item_id) else {
            let _ = reply.send(Err(PipelineError::UnknownItem(item_id)));
            return;
        };

        match item.status() {
            ItemStatus::Queued => {
                let outcome = match item.cancel() {
                    Ok(preview) => {
                        if let Some(preview) = preview {
                            self.collaborators.previews.release(preview);
                        }
                        debug!(item_id = %item_id, "queued item cancelled");
                        self.publish_item(&item_id);
                        self.publish_snapshot();
                        Ok(())
                    }
                    Err(err) => Err(PipelineError::from(err)),
                };
                let _ = reply.send(outcome);
            }
            ItemStatus::Uploading | ItemStatus::Processing => {
                let Some(run) = self.run.as_mut() else {
                    let _ = reply.send(Err(PipelineError::Closed));
                    return;
                };
                match run.cancels.remove(&item_id) {
                    Some(signal) => {
                        info!(item_id = %item_id, "cancellation requested");
                        let _ = signal.send(());
                        run.cancel_replies.insert(item_id, reply);
                    }
                    None => {
                        let _ = reply.send(Err(PipelineError::validation(format!(
                            "cancellation of {item_id} already requested"
                        ))));
                    }
                }
            }
            status => {
                let _ = reply.send(Err(PipelineError::InvalidTransition {
                    item_id,
                    from: status,
                    to: ItemStatus::Cancelled,
                }));
            }
        }
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress {
                item_id,
                bytes_sent,
            } => {
                let Some(item) = self.batch.item_mut(&item_id) else {
                    return;
                };
                let percent = percent_of(bytes_sent, item.size_bytes);
                if item.record_progress(percent) {
                    self.publish_item(&item_id);
                    self.publish_snapshot();
                }
            }
            WorkerEvent::Uploaded { item_id } => {
                let Some(item) = self.batch.item_mut(&item_id) else {
                    return;
                };
                match item.mark_uploaded() {
                    Ok(()) => {
                        debug!(item_id = %item_id, "bytes sent, awaiting finalize");
                        self.publish_item(&item_id);
                        self.publish_snapshot();
                    }
                    Err(err) => debug!(error = %err, "dropping stale upload event"),
                }
            }
            WorkerEvent::Finished { item_id, outcome } => {
                self.apply_outcome(&item_id, outcome);
                self.publish_item(&item_id);
                self.publish_snapshot();
                self.finish_if_settled().await;
            }
            WorkerEvent::Aborted { item_id } => {
                let outcome = match self.batch.item_mut(&item_id) {
                    Some(item) => item.cancel().map_err(PipelineError::from),
                    None => Err(PipelineError::UnknownItem(item_id.clone())),
                };
                let reply_outcome = match outcome {
                    Ok(preview) => {
                        if let Some(preview) = preview {
                            self.collaborators.previews.release(preview);
                        }
                        info!(item_id = %item_id, "item cancelled");
                        Ok(())
                    }
                    Err(err) => Err(err),
                };
                if let Some(reply) = self
                    .run
                    .as_mut()
                    .and_then(|run| run.cancel_replies.remove(&item_id))
                {
                    let _ = reply.send(reply_outcome);
                }
                self.publish_item(&item_id);
                self.publish_snapshot();
                self.finish_if_settled().await;
            }
        }
    }

    fn apply_outcome(&mut self, item_id: &str, outcome: Result<String, TransferFailure>) {
        let Some(item) = self.batch.item_mut(item_id) else {
            return;
        };
        let applied = match outcome {
            Ok(asset_id) => {
                let transition = if item.status() == ItemStatus::Uploading {
                    item.mark_uploaded().and_then(|()| item.complete())
                } else {
                    item.complete()
                };
                if transition.is_ok() {
                    info!(item_id = %item_id, asset_id = %asset_id, "item uploaded");
                }
                transition
            }
            Err(failure) => {
                warn!(item_id = %item_id, name = %item.name, error = %failure, "item failed");
                item.fail(failure.to_string())
            }
        };
        if let Err(err) = applied {
            debug!(error = %err, "ignoring outcome for settled item");
        }

        let status = item.status();
        if let Some(run) = self.run.as_mut() {
            run.cancels.remove(item_id);
            if let Some(reply) = run.cancel_replies.remove(item_id) {
                let _ = reply.send(Err(PipelineError::InvalidTransition {
                    item_id: item_id.to_string(),
                    from: status,
                    to: ItemStatus::Cancelled,
                }));
            }
        }
    }

    async fn finish_if_settled(&mut self) {
        if !self.batch.is_uploading() || !self.batch.all_terminal() {
            return;
        }
        let Some(mut run) = self.run.take() else {
            return;
        };
        self.batch.unlock();
        self.publish_snapshot();

        let Some(target) = self.batch.target().cloned() else {
            error!(batch_id = %self.batch.id(), "settled batch has no target");
            self.discard_batch();
            return;
        };
        if let Some(result) = self.reporter.report(&self.batch, &target).await {
            let _ = self.events.send(BatchEvent::Finished(result.clone()));
            if let Some(result_tx) = run.result.take() {
                let _ = result_tx.send(result);
            }
        }
        self.discard_batch();
    }

    /// Releases the batch's previews and replaces it with a fresh, empty one.
    fn discard_batch(&mut self) {
        let released = self
            .batch
            .release_previews(self.collaborators.previews.as_ref());
        debug!(batch_id = %self.batch.id(), released_previews = released, "batch discarded");
        self.batch = UploadBatch::new();
        self.aggregator.reset();
        self.run = None;
    }

    fn publish_snapshot(&mut self) {
        let snapshot = self.aggregator.snapshot(&self.batch, Instant::now());
        let _ = self.events.send(BatchEvent::Snapshot(snapshot));
    }

    fn publish_item(&self, item_id: &str) {
        if let Some(item) = self.batch.item(item_id) {
            let _ = self.events.send(BatchEvent::ItemChanged {
                batch_id: self.batch.id().to_string(),
                item: item.view(),
            });
        }
    }
}

async fn run_transfer(
    assets: Arc<dyn AssetRepository>,
    request: TransferRequest,
    limit: Option<Arc<Semaphore>>,
    mut cancel: oneshot::Receiver<()>,
    events: mpsc::Sender<WorkerEvent>,
) {
    let item_id = request.item_id.clone();
    let outcome = tokio::select! {
        biased;
        _ = &mut cancel => None,
        outcome = drive_transfer(assets.as_ref(), request, limit, &events) => Some(outcome),
    };

    let event = match outcome {
        Some(outcome) => WorkerEvent::Finished {
            item_id: item_id.clone(),
            outcome,
        },
        None => {
            if let Err(err) = assets.abort(&item_id).await {
                warn!(item_id = %item_id, error = %err, "abort not acknowledged cleanly");
            }
            WorkerEvent::Aborted {
                item_id: item_id.clone(),
            }
        }
    };
    if events.send(event).await.is_err() {
        debug!(item_id = %item_id, "orchestrator gone before transfer settled");
    }
}

async fn drive_transfer(
    assets: &dyn AssetRepository,
    request: TransferRequest,
    limit: Option<Arc<Semaphore>>,
    events: &mpsc::Sender<WorkerEvent>,
) -> Result<String, TransferFailure> {
    let _permit = match limit {
        Some(semaphore) => Some(
            semaphore
                .acquire_owned()
                .await
                .map_err(|_| TransferFailure::Transfer("worker pool closed".to_string()))?,
        ),
        None => None,
    };

    let item_id = request.item_id.clone();
    let mut stream = assets.transfer(request).await?;
    while let Some(event) = stream.next().await {
        match event? {
            TransferEvent::Progress { bytes_sent } => {
                let _ = events
                    .send(WorkerEvent::Progress {
                        item_id: item_id.clone(),
                        bytes_sent,
                    })
                    .await;
            }
            TransferEvent::Uploaded => {
                let _ = events
                    .send(WorkerEvent::Uploaded {
                        item_id: item_id.clone(),
                    })
                    .await;
            }
            TransferEvent::Finalized { asset_id } => return Ok(asset_id),
        }
    }
    Err(TransferFailure::Transfer(
        "transfer ended before finalize".to_string(),
    ))
}
