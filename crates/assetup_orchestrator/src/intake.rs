//! Admission of raw files into a batch, removal before upload, and lazy previews.

use assetup_bridge::PreviewAllocator;
use assetup_contract::{ItemId, ItemStatus, PipelineError, RawFile};
use assetup_transfer::UploadItem;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::batch::UploadBatch;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntakeReport {
    pub admitted: Vec<ItemId>,
    pub rejected: Vec<RejectedFile>,
}

pub struct FileIntake;

impl FileIntake {
    /// Appends every acceptable file in call order. A rejected file never affects the
    /// others; a locked batch rejects the whole call.
    pub fn admit(
        batch: &mut UploadBatch,
        files: Vec<RawFile>,
    ) -> Result<IntakeReport, PipelineError> {
        if batch.is_uploading() {
            return Err(PipelineError::BatchLocked);
        }

        let mut report = IntakeReport::default();
        for file in files {
            if let Err(reason) = Self::validate(batch, &file) {
                debug!(name = %file.name, reason = %reason, "file rejected at intake");
                report.rejected.push(RejectedFile {
                    name: file.name,
                    reason: reason.to_string(),
                });
                continue;
            }
            let item = UploadItem::from_raw(file);
            report.admitted.push(item.id.clone());
            batch.push(item)?;
        }
        Ok(report)
    }

    fn validate(batch: &UploadBatch, file: &RawFile) -> Result<(), PipelineError> {
        if file.size_bytes == 0 {
            return Err(PipelineError::validation(format!("{} is empty", file.name)));
        }
        if batch.items().iter().any(|item| item.is_duplicate_of(file)) {
            return Err(PipelineError::validation(format!(
                "{} ({} bytes) is already queued",
                file.name, file.size_bytes
            )));
        }
        Ok(())
    }

    /// Drops an item from a batch that is not uploading and releases its preview.
    pub fn remove(
        batch: &mut UploadBatch,
        item_id: &str,
        previews: &dyn PreviewAllocator,
    ) -> Result<(), PipelineError> {
        let mut item = batch.remove(item_id)?;
        let preview = if item.status() == ItemStatus::Queued {
            item.cancel()?
        } else {
            item.take_preview()
        };
        if let Some(preview) = preview {
            previews.release(preview);
        }
        Ok(())
    }

    /// Returns the item's preview handle, allocating it on first request. Items that
    /// are not images or videos, or whose preview was already released, have none.
    pub fn preview(
        batch: &mut UploadBatch,
        item_id: &str,
        previews: &dyn PreviewAllocator,
    ) -> Result<Option<String>, PipelineError> {
        let item = batch
            .item_mut(item_id)
            .ok_or_else(|| PipelineError::UnknownItem(item_id.to_string()))?;

        if item.needs_preview() {
            let preview = previews
                .allocate(&item.id, &item.source, &item.mime_type)
                .map_err(|err| PipelineError::Collaborator(err.to_string()))?;
            if let Err(unused) = item.attach_preview(preview) {
                warn!(item_id = %item_id, "preview slot taken, releasing duplicate");
                previews.release(unused);
            }
        }
        Ok(item.preview().map(|preview| preview.as_str().to_string()))
    }
}
