use crate::store::{StorageRow, UpsertStore};
use serde::Serialize;
use tracing::{error, info};

/// A batch that could not be written. `batch` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSummary {
    pub total_processed: usize,
    pub total_batches: usize,
    pub errors: Vec<BatchFailure>,
}

impl UpsertSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Write `rows` in fixed-size batches.
///
/// A failed batch is recorded and the remaining batches are still attempted.
pub async fn batch_upsert<S, R>(store: &S, rows: &[R], batch_size: usize) -> UpsertSummary
where
    S: UpsertStore + ?Sized,
    R: StorageRow,
{
    let batch_size = batch_size.max(1);
    let total_batches = rows.len().div_ceil(batch_size);
    let mut errors = Vec::new();

    info!(
        "Starting batch upsert into {}: {} records in {} batches of {}",
        R::TABLE,
        rows.len(),
        total_batches,
        batch_size
    );

    for (i, batch) in rows.chunks(batch_size).enumerate() {
        let number = i + 1;
        match store.upsert(batch).await {
            Ok(()) => info!("Batch {}/{} completed ({} records)", number, total_batches, batch.len()),
            Err(e) => {
                error!("Batch {}/{} failed: {}", number, total_batches, e);
                errors.push(BatchFailure {
                    batch: number,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        "Batch upsert completed: {} records processed, {} batches with errors",
        rows.len(),
        errors.len()
    );

    UpsertSummary {
        total_processed: rows.len(),
        total_batches,
        errors,
    }
}
