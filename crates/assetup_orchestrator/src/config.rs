use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on transfers running at once. `0` leaves it unbounded.
    pub max_concurrent_transfers: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 4,
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}

impl PipelineConfig {
    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.max_concurrent_transfers {
            0 => None,
            limit => Some(limit),
        }
    }
}
