use std::sync::Arc;

use assetup_bridge::{AssetListRefreshHook, NavigationIntent, NotificationSink};
use assetup_contract::{BatchId, ItemStatus, NotificationLevel, ResolvedTarget, UploadResult};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::batch::UploadBatch;

/// Turns a terminal batch into an [`UploadResult`] and fires the follow-up side effects
/// once per batch.
pub struct CompletionReporter {
    notifications: Arc<dyn NotificationSink>,
    refresh: Arc<dyn AssetListRefreshHook>,
    navigation: Arc<dyn NavigationIntent>,
    last_reported: Option<BatchId>,
}

impl CompletionReporter {
    pub fn new(
        notifications: Arc<dyn NotificationSink>,
        refresh: Arc<dyn AssetListRefreshHook>,
        navigation: Arc<dyn NavigationIntent>,
    ) -> Self {
        Self {
            notifications,
            refresh,
            navigation,
            last_reported: None,
        }
    }

    pub fn summarize(batch: &UploadBatch, target: &ResolvedTarget) -> UploadResult {
        let completed_count = batch.count(ItemStatus::Complete);
        let errored_count = batch.count(ItemStatus::Error);
        UploadResult {
            batch_id: batch.id().to_string(),
            success: errored_count == 0,
            completed_count,
            errored_count,
            cancelled_count: batch.count(ItemStatus::Cancelled),
            total_size_bytes: batch.total_size_bytes(),
            target: target.clone(),
            finished_at: Utc::now(),
        }
    }

    /// Returns `None` when the batch still has unsettled items or was already reported;
    /// nothing is emitted then. Batches are reported in order, so only the most recent id
    /// is remembered.
    pub async fn report(
        &mut self,
        batch: &UploadBatch,
        target: &ResolvedTarget,
    ) -> Option<UploadResult> {
        if !batch.all_terminal() {
            warn!(batch_id = %batch.id(), "refusing to report a batch with unsettled items");
            return None;
        }
        if self.last_reported.as_deref() == Some(batch.id()) {
            debug!(batch_id = %batch.id(), "batch already reported");
            return None;
        }
        self.last_reported = Some(batch.id().to_string());

        let result = Self::summarize(batch, target);
        let (level, message) = describe(&result, batch.len());
        self.notifications.show(level, &message).await;

        if result.completed_count > 0 {
            self.refresh.touch(&target.project_id).await;
        }
        if result.success && result.completed_count > 0 {
            self.navigation
                .go_to(&target.project_id, &target.folder_id)
                .await;
        }

        info!(
            batch_id = %result.batch_id,
            success = result.success,
            completed = result.completed_count,
            errored = result.errored_count,
            cancelled = result.cancelled_count,
            "batch upload finished"
        );
        Some(result)
    }
}

fn describe(result: &UploadResult, total: usize) -> (NotificationLevel, String) {
    let destination = result.target.display_name();
    match (result.completed_count, result.errored_count) {
        (0, 0) => (
            NotificationLevel::Info,
            format!("Upload to {destination} was cancelled"),
        ),
        (completed, 0) => (
            NotificationLevel::Success,
            format!("Uploaded {completed} {} to {destination}", files(completed)),
        ),
        (0, errored) => (
            NotificationLevel::Error,
            format!(
                "Upload to {destination} failed: {errored} {} could not be uploaded",
                files(errored)
            ),
        ),
        (completed, errored) => (
            NotificationLevel::Warning,
            format!("Uploaded {completed} of {total} files to {destination}; {errored} failed"),
        ),
    }
}

fn files(count: usize) -> &'static str {
    if count == 1 {
        "file"
    } else {
        "files"
    }
}
