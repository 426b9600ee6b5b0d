pub mod error;
pub mod model;

pub use error::PipelineError;
pub use model::{
    new_id, BatchId, BatchMetadata, BatchTarget, FolderId, ItemId, ItemStatus, NotificationLevel,
    PreviewRef, ProgressSnapshot, ProjectId, RawFile, ResolvedTarget, SourceRef, UploadResult,
    ROOT_FOLDER,
};
