use assetup_bridge::PreviewAllocator;
use assetup_contract::{new_id, BatchId, BatchMetadata, ItemStatus, PipelineError, ResolvedTarget};
use assetup_transfer::{ItemView, UploadItem};

/// The set of items bound for one target. While `is_uploading` the item list is frozen;
/// only item status and progress may change.
#[derive(Debug)]
pub struct UploadBatch {
    id: BatchId,
    items: Vec<UploadItem>,
    target: Option<ResolvedTarget>,
    metadata: BatchMetadata,
    is_uploading: bool,
}

impl Default for UploadBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadBatch {
    pub fn new() -> Self {
        Self {
            id: new_id(),
            items: Vec::new(),
            target: None,
            metadata: BatchMetadata::default(),
            is_uploading: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn items(&self) -> &[UploadItem] {
        &self.items
    }

    pub(crate) fn items_mut(&mut self) -> &mut [UploadItem] {
        &mut self.items
    }

    pub fn item(&self, item_id: &str) -> Option<&UploadItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub(crate) fn item_mut(&mut self, item_id: &str) -> Option<&mut UploadItem> {
        self.items.iter_mut().find(|item| item.id == item_id)
    }

    pub fn target(&self) -> Option<&ResolvedTarget> {
        self.target.as_ref()
    }

    pub fn metadata(&self) -> &BatchMetadata {
        &self.metadata
    }

    pub fn is_uploading(&self) -> bool {
        self.is_uploading
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items
            .iter()
            .filter(|item| item.status() == status)
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.items.iter().all(UploadItem::is_terminal)
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.items.iter().map(|item| item.size_bytes).sum()
    }

    pub fn views(&self) -> Vec<ItemView> {
        self.items.iter().map(UploadItem::view).collect()
    }

    pub(crate) fn push(&mut self, item: UploadItem) -> Result<(), PipelineError> {
        if self.is_uploading {
            return Err(PipelineError::BatchLocked);
        }
        self.items.push(item);
        Ok(())
    }

    pub(crate) fn remove(&mut self, item_id: &str) -> Result<UploadItem, PipelineError> {
        if self.is_uploading {
            return Err(PipelineError::BatchLocked);
        }
        let index = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or_else(|| PipelineError::UnknownItem(item_id.to_string()))?;
        Ok(self.items.remove(index))
    }

    /// Binds the batch to its target and freezes the item list.
    pub(crate) fn lock(&mut self, target: ResolvedTarget, metadata: BatchMetadata) {
        self.target = Some(target);
        self.metadata = metadata;
        self.is_uploading = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.is_uploading = false;
    }

    /// Releases every preview still held by an item. Returns how many were released.
    pub(crate) fn release_previews(&mut self, previews: &dyn PreviewAllocator) -> usize {
        let mut released = 0;
        for item in &mut self.items {
            if let Some(preview) = item.take_preview() {
                previews.release(preview);
                released += 1;
            }
        }
        released
    }
}
