pub mod local;
pub mod repository;

pub use local::{file_size, LocalAssetConfig, LocalAssetRepository};
pub use repository::{
    AssetRecord, CatalogStorage, FolderRecord, NewAsset, ProjectRecord, StorageConfig,
};
