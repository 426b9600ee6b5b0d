use assetup_contract::{new_id, ItemId, ItemStatus, PipelineError, PreviewRef, RawFile, SourceRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("item {item_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub item_id: ItemId,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

impl From<TransitionError> for PipelineError {
    fn from(err: TransitionError) -> Self {
        PipelineError::InvalidTransition {
            item_id: err.item_id,
            from: err.from,
            to: err.to,
        }
    }
}

#[derive(Debug)]
enum PreviewSlot {
    None,
    Pending,
    Allocated(PreviewRef),
    Released,
}

/// One file's transfer unit. Status only changes through the transition methods below.
#[derive(Debug)]
pub struct UploadItem {
    pub id: ItemId,
    pub source: SourceRef,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    preview: PreviewSlot,
    status: ItemStatus,
    progress_percent: u8,
    error_message: Option<String>,
}

impl UploadItem {
    pub fn from_raw(file: RawFile) -> Self {
        let preview = if file.wants_preview() {
            PreviewSlot::Pending
        } else {
            PreviewSlot::None
        };
        Self {
            id: new_id(),
            source: file.source,
            name: file.name,
            size_bytes: file.size_bytes,
            mime_type: file.mime_type,
            preview,
            status: ItemStatus::Queued,
            progress_percent: 0,
            error_message: None,
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_duplicate_of(&self, file: &RawFile) -> bool {
        self.name == file.name && self.size_bytes == file.size_bytes
    }

    /// queued -> uploading
    pub fn admit(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Uploading)
    }

    /// Accepts a progress report only while uploading and never lowers the value.
    /// Returns whether the stored percent changed.
    pub fn record_progress(&mut self, percent: u8) -> bool {
        if self.status != ItemStatus::Uploading {
            return false;
        }
        let percent = percent.min(100);
        if percent <= self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        true
    }

    /// uploading -> processing; bytes are all sent, awaiting finalize.
    pub fn mark_uploaded(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Processing)?;
        self.progress_percent = 100;
        Ok(())
    }

    /// processing -> complete
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Complete)?;
        self.progress_percent = 100;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Moves the item to `cancelled` and hands back its preview for release.
    pub fn cancel(&mut self) -> Result<Option<PreviewRef>, TransitionError> {
        self.transition(ItemStatus::Cancelled)?;
        Ok(self.take_preview())
    }

    fn transition(&mut self, to: ItemStatus) -> Result<(), TransitionError> {
        if !allowed(self.status, to) {
            return Err(TransitionError {
                item_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn needs_preview(&self) -> bool {
        matches!(self.preview, PreviewSlot::Pending)
    }

    pub fn preview(&self) -> Option<&PreviewRef> {
        match &self.preview {
            PreviewSlot::Allocated(preview) => Some(preview),
            _ => None,
        }
    }

    pub fn attach_preview(&mut self, preview: PreviewRef) -> Result<(), PreviewRef> {
        if !self.needs_preview() {
            return Err(preview);
        }
        self.preview = PreviewSlot::Allocated(preview);
        Ok(())
    }

    /// Takes the allocated preview out of the item. Afterwards no new preview is
    /// allocated for it.
    pub fn take_preview(&mut self) -> Option<PreviewRef> {
        match std::mem::replace(&mut self.preview, PreviewSlot::Released) {
            PreviewSlot::Allocated(preview) => Some(preview),
            PreviewSlot::None => {
                self.preview = PreviewSlot::None;
                None
            }
            PreviewSlot::Pending | PreviewSlot::Released => None,
        }
    }

    pub fn view(&self) -> ItemView {
        ItemView {
            id: self.id.clone(),
            name: self.name.clone(),
            size_bytes: self.size_bytes,
            mime_type: self.mime_type.clone(),
            status: self.status,
            progress_percent: self.progress_percent,
            error_message: self.error_message.clone(),
            has_preview: self.preview().is_some(),
        }
    }
}

fn allowed(from: ItemStatus, to: ItemStatus) -> bool {
    use ItemStatus::*;
    matches!(
        (from, to),
        (Queued, Uploading)
            | (Queued, Cancelled)
            | (Uploading, Processing)
            | (Uploading, Error)
            | (Uploading, Cancelled)
            | (Processing, Complete)
            | (Processing, Error)
            | (Processing, Cancelled)
    )
}

/// Read-only row for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemView {
    pub id: ItemId,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub status: ItemStatus,
    pub progress_percent: u8,
    pub error_message: Option<String>,
    pub has_preview: bool,
}
