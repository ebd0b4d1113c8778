// lamp/mod.rs
pub mod tcp;

use crate::error::LampError;
use crate::scene::Batch;

/// Per-batch settlement summary. `succeeded + failed` equals the batch
/// length once `apply_batch` returns `Ok`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn all_failed(len: usize) -> Self {
        Self {
            succeeded: 0,
            failed: len,
        }
    }
}

/// One session against one lamp endpoint. `Err` means the session could
/// not be established at all; individual command failures are folded into
/// the report instead.
#[async_trait::async_trait]
pub trait LampClient: Send + Sync {
    async fn apply_batch(&self, batch: &Batch) -> Result<BatchReport, LampError>;
}
