use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BatchId = String;
pub type ItemId = String;
pub type ProjectId = String;
pub type FolderId = String;

/// Folder id addressing the top level of a project.
pub const ROOT_FOLDER: &str = "root";

pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Opaque handle to the bytes of a file. Only the asset repository interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transient preview handle. Deliberately not `Clone`: whoever holds it must hand it
/// back to the allocator exactly once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PreviewRef(String);

impl PreviewRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A file handle as delivered by a picker or a drop event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawFile {
    pub source: SourceRef,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl RawFile {
    pub fn new(
        source: SourceRef,
        name: impl Into<String>,
        size_bytes: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            source,
            name: name.into(),
            size_bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn wants_preview(&self) -> bool {
        self.mime_type.starts_with("image/") || self.mime_type.starts_with("video/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchTarget {
    pub project_id: ProjectId,
    pub folder_id: FolderId,
}

impl BatchTarget {
    pub fn new(project_id: impl Into<ProjectId>, folder_id: impl Into<FolderId>) -> Self {
        Self {
            project_id: project_id.into(),
            folder_id: folder_id.into(),
        }
    }

    pub fn root(project_id: impl Into<ProjectId>) -> Self {
        Self::new(project_id, ROOT_FOLDER)
    }

    pub fn is_root(&self) -> bool {
        self.folder_id == ROOT_FOLDER
    }
}

/// Target after validation. Names are for user feedback only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub project_id: ProjectId,
    pub project_name: String,
    pub folder_id: FolderId,
    pub folder_name: Option<String>,
}

impl ResolvedTarget {
    pub fn as_target(&self) -> BatchTarget {
        BatchTarget::new(self.project_id.clone(), self.folder_id.clone())
    }

    pub fn display_name(&self) -> String {
        match &self.folder_name {
            Some(folder) => format!("{} / {}", self.project_name, folder),
            None => self.project_name.clone(),
        }
    }
}

/// License and tag annotations applied to every item of a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchMetadata {
    pub license: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Uploading,
    Processing,
    Complete,
    Error,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived aggregate view over a batch. Recomputed, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub batch_id: BatchId,
    pub overall_percent: u8,
    pub completed_count: usize,
    pub total_count: usize,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub throughput_bytes_per_sec: f64,
    pub eta_secs: u64,
    pub taken_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn is_settled(&self) -> bool {
        self.completed_count == self.total_count
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResult {
    pub batch_id: BatchId,
    pub success: bool,
    pub completed_count: usize,
    pub errored_count: usize,
    pub cancelled_count: usize,
    pub total_size_bytes: u64,
    pub target: ResolvedTarget,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::{BatchTarget, ItemStatus, RawFile, SourceRef};

    #[test]
    fn preview_only_for_visual_media() {
        let image = RawFile::new(SourceRef::new("a"), "a.png", 10, "image/png");
        let video = RawFile::new(SourceRef::new("b"), "b.mp4", 10, "video/mp4");
        let doc = RawFile::new(SourceRef::new("c"), "c.pdf", 10, "application/pdf");

        assert!(image.wants_preview());
        assert!(video.wants_preview());
        assert!(!doc.wants_preview());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ItemStatus::Cancelled).expect("serialize");
        assert_eq!(json, "\"cancelled\"");
        assert!(ItemStatus::Error.is_terminal());
        assert!(!ItemStatus::Processing.is_terminal());
    }

    #[test]
    fn root_target_is_recognized() {
        assert!(BatchTarget::root("p1").is_root());
        assert!(!BatchTarget::new("p1", "f1").is_root());
    }
}
