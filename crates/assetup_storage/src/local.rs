use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use assetup_bridge::{AssetRepository, RepositoryError, TransferStream};
use assetup_contract::{new_id, ItemId};
use assetup_transfer::{TransferEvent, TransferFailure, TransferRequest};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::repository::{CatalogStorage, NewAsset};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAssetConfig {
    pub root_dir: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
}

fn default_chunk_size() -> usize {
    256 * 1024
}

/// A transfer whose outcome has not been observed by the caller yet.
#[derive(Debug)]
struct InFlightJob {
    asset_id: String,
    destination: PathBuf,
    job: Option<JoinHandle<()>>,
}

type InFlight = Arc<Mutex<HashMap<ItemId, InFlightJob>>>;

fn jobs(in_flight: &InFlight) -> MutexGuard<'_, HashMap<ItemId, InFlightJob>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Copies source files (the `SourceRef` is a filesystem path) under `root_dir` and
/// records them in the catalog once all bytes are on disk.
///
/// A job stays tracked until its stream yields `Finalized` or a failure, or until
/// `abort` is called. `abort` waits for the copy job to stop and then removes both the
/// copied file and any asset row it managed to record.
#[derive(Debug, Clone)]
pub struct LocalAssetRepository {
    config: LocalAssetConfig,
    catalog: CatalogStorage,
    in_flight: InFlight,
}

impl LocalAssetRepository {
    pub fn new(config: LocalAssetConfig, catalog: CatalogStorage) -> Self {
        Self {
            config,
            catalog,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn destination(&self, request: &TransferRequest, asset_id: &str) -> PathBuf {
        self.config
            .root_dir
            .join(sanitize(&request.target.project_id))
            .join(sanitize(&request.target.folder_id))
            .join(format!("{asset_id}-{}", sanitize(&request.name)))
    }

    async fn open_destination(&self, destination: &Path) -> Result<File, TransferFailure> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await.map_err(|err| {
                TransferFailure::Transfer(format!("cannot create {}: {err}", parent.display()))
            })?;
        }
        File::create(destination).await.map_err(|err| {
            TransferFailure::Transfer(format!("cannot create {}: {err}", destination.display()))
        })
    }
}

#[async_trait]
impl AssetRepository for LocalAssetRepository {
    async fn transfer(&self, request: TransferRequest) -> Result<TransferStream, TransferFailure> {
        let source = File::open(request.source.as_str()).await.map_err(|err| {
            TransferFailure::Transfer(format!("cannot open {}: {err}", request.source))
        })?;

        let item_id = request.item_id.clone();
        let asset_id = new_id();
        let destination = self.destination(&request, &asset_id);
        // Tracked before the file exists.
        jobs(&self.in_flight).insert(
            item_id.clone(),
            InFlightJob {
                asset_id: asset_id.clone(),
                destination: destination.clone(),
                job: None,
            },
        );

        let sink = match self.open_destination(&destination).await {
            Ok(sink) => sink,
            Err(failure) => {
                jobs(&self.in_flight).remove(&item_id);
                return Err(failure);
            }
        };

        let (tx, rx) = mpsc::channel(16);
        let job = CopyJob {
            request,
            asset_id,
            destination,
            chunk_size: self.config.chunk_size_bytes.max(1),
            catalog: self.catalog.clone(),
        };
        let handle = tokio::spawn(job.run(source, sink, tx));
        if let Some(entry) = jobs(&self.in_flight).get_mut(&item_id) {
            entry.job = Some(handle);
        }

        let in_flight = self.in_flight.clone();
        let stream = ReceiverStream::new(rx).inspect(move |event| {
            if matches!(event, Ok(TransferEvent::Finalized { .. }) | Err(_)) {
                jobs(&in_flight).remove(&item_id);
            }
        });
        Ok(stream.boxed())
    }

    async fn abort(&self, item_id: &str) -> Result<(), RepositoryError> {
        let Some(entry) = jobs(&self.in_flight).remove(item_id) else {
            return Ok(());
        };

        if let Some(job) = entry.job {
            if let Err(err) = job.await {
                warn!(item_id = %item_id, error = %err, "copy job ended abnormally");
            }
        }

        let removed_row = self
            .catalog
            .delete_asset(&entry.asset_id)
            .await
            .map_err(|err| RepositoryError::Backend(format!("{err:#}")))?;
        if removed_row {
            info!(item_id = %item_id, asset_id = %entry.asset_id, "rolled back finalized asset");
        }

        match fs::remove_file(&entry.destination).await {
            Ok(()) => {
                info!(item_id = %item_id, path = %entry.destination.display(), "removed partial upload");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RepositoryError::Backend(format!(
                "cannot remove {}: {err}",
                entry.destination.display()
            ))),
        }
    }
}

struct CopyJob {
    request: TransferRequest,
    asset_id: String,
    destination: PathBuf,
    chunk_size: usize,
    catalog: CatalogStorage,
}

type EventSender = mpsc::Sender<Result<TransferEvent, TransferFailure>>;

impl CopyJob {
    async fn run(self, source: File, sink: File, tx: EventSender) {
        let item_id = self.request.item_id.clone();
        match self.copy_and_finalize(source, sink, &tx).await {
            Ok(true) => {}
            Ok(false) => debug!(item_id = %item_id, "transfer receiver dropped"),
            Err(failure) => {
                warn!(item_id = %item_id, error = %failure, "local transfer failed");
                let _ = fs::remove_file(&self.destination).await;
                let _ = tx.send(Err(failure)).await;
            }
        }
    }

    /// Returns `Ok(false)` when the receiver went away, i.e. the transfer was aborted.
    async fn copy_and_finalize(
        &self,
        mut source: File,
        mut sink: File,
        tx: &EventSender,
    ) -> Result<bool, TransferFailure> {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut sent: u64 = 0;
        loop {
            let read = source
                .read(&mut buffer)
                .await
                .map_err(|err| TransferFailure::Transfer(format!("read failed: {err}")))?;
            if read == 0 {
                break;
            }
            sink.write_all(&buffer[..read])
                .await
                .map_err(|err| TransferFailure::Transfer(format!("write failed: {err}")))?;
            sent += read as u64;
            if tx
                .send(Ok(TransferEvent::Progress { bytes_sent: sent }))
                .await
                .is_err()
            {
                return Ok(false);
            }
        }
        sink.flush()
            .await
            .map_err(|err| TransferFailure::Transfer(format!("flush failed: {err}")))?;

        if sent != self.request.size_bytes {
            return Err(TransferFailure::Transfer(format!(
                "source changed during upload: expected {} bytes, read {sent}",
                self.request.size_bytes
            )));
        }
        if tx.send(Ok(TransferEvent::Uploaded)).await.is_err() {
            return Ok(false);
        }

        if tx.is_closed() {
            return Ok(false);
        }
        self.finalize()
            .await
            .map_err(|err| TransferFailure::Finalize(format!("{err:#}")))?;
        Ok(tx
            .send(Ok(TransferEvent::Finalized {
                asset_id: self.asset_id.clone(),
            }))
            .await
            .is_ok())
    }

    async fn finalize(&self) -> Result<()> {
        let request = &self.request;
        self.catalog
            .record_asset(&NewAsset {
                asset_id: self.asset_id.clone(),
                project_id: request.target.project_id.clone(),
                folder_id: request.target.folder_id.clone(),
                name: request.name.clone(),
                size_bytes: request.size_bytes,
                mime_type: request.mime_type.clone(),
                license: request.metadata.license.clone(),
                tags: request.metadata.tags.clone(),
                stored_path: self.destination.display().to_string(),
            })
            .await
            .with_context(|| format!("record asset {}", self.asset_id))?;
        info!(
            asset_id = %self.asset_id,
            project_id = %request.target.project_id,
            folder_id = %request.target.folder_id,
            "asset finalized"
        );
        Ok(())
    }
}

fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Size of a local file, for building `RawFile`s from paths.
pub async fn file_size(path: &Path) -> Result<u64> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("stat {}", path.display()))?;
    Ok(metadata.len())
}
