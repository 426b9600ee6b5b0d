pub mod bridge;
pub mod memory;

pub use bridge::{
    AssetListRefreshHook, AssetRepository, Collaborators, FolderInfo, FolderRepository,
    NavigationIntent, NotificationSink, PreviewAllocator, ProjectInfo, ProjectRepository,
    RepositoryError, TransferStream,
};
pub use memory::{
    InMemoryCatalog, LoggingFeedback, RecordingFeedback, Script, ScriptedAssetRepository,
    SequentialPreviews,
};
