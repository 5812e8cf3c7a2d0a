//! Queue mode: work items are produced onto a channel and consumed by independent
//! workers, each of which fetches and persists a single (venue, date) row.

use super::orchestrator::{fetch_group, WorkItem};
use crate::api::TeeTimeSource;
use crate::models::TeeTimeRow;
use crate::store::UpsertStore;
use crate::utils::batch::BatchFailure;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of the workers that drained one queue
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub items_processed: usize,
    pub tee_times: usize,
    /// Failed writes, numbered by the order workers picked the items up (1-based)
    pub errors: Vec<BatchFailure>,
}

impl WorkerReport {
    fn merge(&mut self, other: WorkerReport) {
        self.items_processed += other.items_processed;
        self.tee_times += other.tee_times;
        self.errors.extend(other.errors);
    }
}

/// Push `items` onto the queue from a background task and return how many were
/// dispatched. Does not wait for delivery or processing.
pub fn dispatch(sender: mpsc::Sender<WorkItem>, items: Vec<WorkItem>) -> usize {
    let count = items.len();
    tokio::spawn(async move {
        for item in items {
            if sender.send(item).await.is_err() {
                warn!("Work queue closed before every item was dispatched");
                break;
            }
        }
    });
    info!("Dispatched {} work items", count);
    count
}

/// Start `workers` consumers on `receiver`. The returned handle resolves once the
/// queue is closed and drained.
pub fn spawn_workers<S, W>(
    workers: usize,
    receiver: mpsc::Receiver<WorkItem>,
    source: Arc<S>,
    store: Arc<W>,
) -> JoinHandle<WorkerReport>
where
    S: TeeTimeSource + ?Sized + 'static,
    W: UpsertStore + 'static,
{
    let receiver = Arc::new(Mutex::new(receiver));
    let sequence = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let handles: Vec<JoinHandle<WorkerReport>> = (0..workers.max(1))
        .map(|worker| {
            let receiver = Arc::clone(&receiver);
            let sequence = Arc::clone(&sequence);
            let source = Arc::clone(&source);
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let mut report = WorkerReport::default();
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(item) = next else { break };
                    let number =
                        sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;

                    let group = fetch_group(source.as_ref(), &item).await;
                    report.items_processed += 1;
                    report.tee_times += group.tee_times_count();

                    let row = TeeTimeRow::from_group(group, Utc::now());
                    match store.upsert(std::slice::from_ref(&row)).await {
                        Ok(()) => debug!(
                            "Worker {} stored {} on {}",
                            worker, item.venue.name, item.date
                        ),
                        Err(e) => {
                            error!(
                                "Worker {} failed to store {} on {}: {}",
                                worker, item.venue.name, item.date, e
                            );
                            report.errors.push(BatchFailure {
                                batch: number,
                                error: format!("{} on {}: {}", item.venue.name, item.date, e),
                            });
                        }
                    }
                }
                report
            })
        })
        .collect();

    tokio::spawn(async move {
        let mut total = WorkerReport::default();
        for handle in handles {
            match handle.await {
                Ok(report) => total.merge(report),
                Err(e) => error!("Worker task panicked: {}", e),
            }
        }
        total.errors.sort_by_key(|f| f.batch);
        total
    })
}
