use assetup_contract::{ItemStatus, ProgressSnapshot};
use assetup_transfer::UploadItem;
use chrono::Utc;
use tokio::time::Instant;

use crate::batch::UploadBatch;

/// Weight of the newest window when smoothing throughput.
const THROUGHPUT_SMOOTHING: f64 = 0.3;

/// Recomputes batch-level progress from item state. Only the timing baseline is
/// remembered between snapshots.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    started_at: Option<Instant>,
    last_sample: Option<(Instant, u64)>,
    throughput: f64,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.last_sample = Some((now, 0));
        self.throughput = 0.0;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&mut self, batch: &UploadBatch, now: Instant) -> ProgressSnapshot {
        let items = batch.items();
        let total_count = items.len();
        let completed_count = items.iter().filter(|item| item.is_terminal()).count();
        let overall_percent = overall_percent(items);

        let bytes_transferred: u64 = items.iter().map(bytes_moved).sum();
        let total_bytes: u64 = items
            .iter()
            .filter(|item| item.status() != ItemStatus::Cancelled)
            .map(|item| item.size_bytes)
            .sum();
        let remaining_bytes: u64 = items
            .iter()
            .filter(|item| !item.is_terminal())
            .map(|item| item.size_bytes.saturating_sub(bytes_moved(item)))
            .sum();

        self.update_throughput(bytes_transferred, now);

        let eta_secs = if completed_count == total_count || self.throughput <= 0.0 {
            0
        } else {
            (remaining_bytes as f64 / self.throughput).ceil() as u64
        };

        ProgressSnapshot {
            batch_id: batch.id().to_string(),
            overall_percent,
            completed_count,
            total_count,
            bytes_transferred,
            total_bytes,
            throughput_bytes_per_sec: self.throughput,
            eta_secs,
            taken_at: Utc::now(),
        }
    }

    fn update_throughput(&mut self, bytes_transferred: u64, now: Instant) {
        let Some(started_at) = self.started_at else {
            return;
        };
        let (last_at, last_bytes) = self.last_sample.unwrap_or((started_at, 0));
        let window = now.saturating_duration_since(last_at).as_secs_f64();
        let delta = bytes_transferred.saturating_sub(last_bytes);

        if window > 0.0 && delta > 0 {
            let recent = delta as f64 / window;
            self.throughput = if self.throughput > 0.0 {
                THROUGHPUT_SMOOTHING * recent + (1.0 - THROUGHPUT_SMOOTHING) * self.throughput
            } else {
                recent
            };
            self.last_sample = Some((now, bytes_transferred));
        } else if self.throughput <= 0.0 {
            let elapsed = now.saturating_duration_since(started_at).as_secs_f64();
            if elapsed > 0.0 {
                self.throughput = bytes_transferred as f64 / elapsed;
            }
        }
    }
}

/// Mean item progress. Cancelled items drop out; settled items count as 100.
fn overall_percent(items: &[UploadItem]) -> u8 {
    let contributions: Vec<u64> = items
        .iter()
        .filter_map(|item| match item.status() {
            ItemStatus::Cancelled => None,
            ItemStatus::Queued | ItemStatus::Uploading => Some(item.progress_percent() as u64),
            ItemStatus::Processing | ItemStatus::Complete | ItemStatus::Error => Some(100),
        })
        .collect();

    if contributions.is_empty() {
        let settled = !items.is_empty() && items.iter().all(UploadItem::is_terminal);
        return if settled { 100 } else { 0 };
    }
    (contributions.iter().sum::<u64>() / contributions.len() as u64) as u8
}

fn bytes_moved(item: &UploadItem) -> u64 {
    match item.status() {
        ItemStatus::Queued => 0,
        ItemStatus::Processing | ItemStatus::Complete => item.size_bytes,
        ItemStatus::Uploading | ItemStatus::Error | ItemStatus::Cancelled => {
            (item.size_bytes as u128 * item.progress_percent() as u128 / 100) as u64
        }
    }
}
