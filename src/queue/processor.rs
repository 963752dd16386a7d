//! Drains the offline queue against the backend
//!
//! A drain cycle takes one snapshot of the queue and walks it oldest first,
//! one submission at a time. A failed item is charged one retry and left for
//! the next cycle; it is never retried twice within the same pass.

use super::models::{CompletePayload, QueueItem, QueuedAction, StartPayload};
use super::operation_queue::OperationQueue;
use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sends queued actions to the backend
///
/// `Ok(true)` means the backend accepted the action. `Ok(false)` and `Err`
/// both mean "not yet"; the processor does not distinguish them.
#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    async fn submit_start(&self, payload: &StartPayload) -> anyhow::Result<bool>;

    async fn submit_complete(&self, payload: &CompletePayload) -> anyhow::Result<bool>;

    async fn submit(&self, action: &QueuedAction) -> anyhow::Result<bool> {
        match action {
            QueuedAction::Start(payload) => self.submit_start(payload).await,
            QueuedAction::Complete(payload) => self.submit_complete(payload).await,
        }
    }
}

/// Progress callback: `(items processed so far, snapshot size)`
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Aggregate outcome of one drain cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Items in the snapshot
    pub total: usize,
    /// Items accepted by the backend and removed
    pub success_count: usize,
    /// Items dropped for exhausting their retries
    pub failed_count: usize,
    /// Items that failed but remain queued for a later cycle
    pub retained_count: usize,
}

impl DrainSummary {
    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && self.retained_count == 0
    }
}

enum Attempt {
    Accepted,
    Rejected,
    Errored(String),
}

pub struct QueueProcessor {
    queue: Arc<OperationQueue>,
    drain_lock: Mutex<()>,
}

impl QueueProcessor {
    pub fn new(queue: Arc<OperationQueue>) -> Self {
        Self {
            queue,
            drain_lock: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// Whether a drain cycle is currently running
    pub fn is_draining(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    /// Run a drain cycle unless one is already in flight
    pub async fn try_process_queue(
        &self,
        submitter: &dyn ActionSubmitter,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Option<DrainSummary> {
        let guard = self.drain_lock.try_lock().ok()?;
        let summary = self.drain(submitter, on_progress).await;
        drop(guard);
        Some(summary)
    }

    /// Run a drain cycle, waiting for any in-flight cycle to finish first
    ///
    /// Never fails: storage and submission errors are logged and folded
    /// into the returned counts.
    pub async fn process_queue(
        &self,
        submitter: &dyn ActionSubmitter,
        on_progress: Option<ProgressFn<'_>>,
    ) -> DrainSummary {
        let _guard = self.drain_lock.lock().await;
        self.drain(submitter, on_progress).await
    }

    async fn drain(&self, submitter: &dyn ActionSubmitter, on_progress: Option<ProgressFn<'_>>) -> DrainSummary {
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let snapshot = match self.queue.list_pending().await {
            Ok(items) => items,
            Err(e) => {
                error!("Drain {} aborted: failed to read queue: {}", correlation_id, e);
                return DrainSummary::default();
            }
        };

        let mut summary = DrainSummary {
            total: snapshot.len(),
            ..Default::default()
        };

        if snapshot.is_empty() {
            debug!("Drain {}: queue empty", correlation_id);
            return summary;
        }

        info!(
            "{}",
            json!({
                "event": "drain_started",
                "correlation_id": correlation_id,
                "pending": summary.total,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })
        );

        for (index, item) in snapshot.iter().enumerate() {
            match attempt(submitter, item).await {
                Attempt::Accepted => {
                    if let Err(e) = self.queue.remove(&item.id).await {
                        // Accepted upstream; a leftover entry is resubmitted later
                        warn!("Submitted {} but failed to remove it from the queue: {}", item.id, e);
                    }
                    summary.success_count += 1;
                }
                outcome => {
                    match outcome {
                        Attempt::Errored(reason) => {
                            warn!("Submission of {} {} failed: {}", item.operation_type(), item.id, reason)
                        }
                        _ => debug!("Submission of {} {} was not accepted", item.operation_type(), item.id),
                    }
                    self.record_failure(item, &mut summary).await;
                }
            }

            if let Some(progress) = on_progress {
                progress(index + 1, summary.total);
            }
        }

        info!(
            "{}",
            json!({
                "event": "drain_completed",
                "correlation_id": correlation_id,
                "total": summary.total,
                "succeeded": summary.success_count,
                "dropped": summary.failed_count,
                "retained": summary.retained_count,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })
        );

        summary
    }

    async fn record_failure(&self, item: &QueueItem, summary: &mut DrainSummary) {
        match self.queue.increment_retry(&item.id).await {
            Ok(true) => summary.retained_count += 1,
            Ok(false) => {
                if !item.is_last_attempt() {
                    // The entry vanished underneath us (cleared or removed elsewhere)
                    debug!("Queue item {} disappeared during drain", item.id);
                }
                summary.failed_count += 1;
            }
            Err(e) => {
                error!("Failed to record retry for {}: {}", item.id, e);
                summary.retained_count += 1;
            }
        }
    }
}

async fn attempt(submitter: &dyn ActionSubmitter, item: &QueueItem) -> Attempt {
    match AssertUnwindSafe(submitter.submit(&item.action)).catch_unwind().await {
        Ok(Ok(true)) => Attempt::Accepted,
        Ok(Ok(false)) => Attempt::Rejected,
        Ok(Err(e)) => Attempt::Errored(format!("{:#}", e)),
        Err(_) => Attempt::Errored("submitter panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::models::ProcessResult;
    use crate::storage::MemoryStore;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn start(wip: &str) -> QueuedAction {
        QueuedAction::Start(StartPayload {
            wip_id: wip.to_string(),
            process_id: "P-1".to_string(),
            worker_id: "W-1".to_string(),
        })
    }

    fn complete(wip: &str) -> QueuedAction {
        QueuedAction::Complete(CompletePayload {
            wip_id: wip.to_string(),
            process_id: "P-1".to_string(),
            worker_id: "W-1".to_string(),
            result: ProcessResult::Fail,
            measurement_data: None,
            notes: Some("scratched housing".to_string()),
        })
    }

    fn processor(max_retries: u32) -> QueueProcessor {
        let queue = OperationQueue::new(Arc::new(MemoryStore::new())).with_max_retries(max_retries);
        QueueProcessor::new(Arc::new(queue))
    }

    /// Records every call and answers according to `accept`
    struct Recorder {
        calls: StdMutex<Vec<String>>,
        accept: Box<dyn Fn(&str) -> anyhow::Result<bool> + Send + Sync>,
    }

    impl Recorder {
        fn new(accept: impl Fn(&str) -> anyhow::Result<bool> + Send + Sync + 'static) -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                accept: Box::new(accept),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionSubmitter for Recorder {
        async fn submit_start(&self, payload: &StartPayload) -> anyhow::Result<bool> {
            let call = format!("start:{}", payload.wip_id);
            self.calls.lock().unwrap().push(call.clone());
            (self.accept)(&call)
        }

        async fn submit_complete(&self, payload: &CompletePayload) -> anyhow::Result<bool> {
            let call = format!("complete:{}", payload.wip_id);
            self.calls.lock().unwrap().push(call.clone());
            (self.accept)(&call)
        }
    }

    #[tokio::test]
    async fn test_all_succeed_empties_queue() {
        let processor = processor(5);
        for i in 0..4 {
            processor.queue().enqueue(start(&format!("WIP-{}", i))).await.unwrap();
        }

        let submitter = Recorder::new(|_| Ok(true));
        let summary = processor.process_queue(&submitter, None).await;

        assert_eq!(summary.success_count, 4);
        assert_eq!(summary.failed_count, 0);
        assert!(summary.is_clean());
        assert_eq!(processor.queue().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_submitted_before_complete() {
        let processor = processor(5);
        processor.queue().enqueue(start("WIP-9")).await.unwrap();
        processor.queue().enqueue(complete("WIP-9")).await.unwrap();

        let submitter = Recorder::new(|_| Ok(true));
        processor.process_queue(&submitter, None).await;

        assert_eq!(submitter.calls(), vec!["start:WIP-9", "complete:WIP-9"]);
    }

    #[tokio::test]
    async fn test_always_failing_items_dropped_after_max_retries() {
        let processor = processor(3);
        processor.queue().enqueue(start("WIP-1")).await.unwrap();
        processor.queue().enqueue(complete("WIP-1")).await.unwrap();

        let submitter = Recorder::new(|_| Ok(false));

        for _ in 0..2 {
            let summary = processor.process_queue(&submitter, None).await;
            assert_eq!(summary.retained_count, 2);
            assert_eq!(summary.failed_count, 0);
        }

        let summary = processor.process_queue(&submitter, None).await;
        assert_eq!(summary.failed_count, 2);
        assert_eq!(summary.retained_count, 0);
        assert_eq!(processor.queue().count().await.unwrap(), 0);

        // One attempt per item per cycle
        assert_eq!(submitter.calls().len(), 6);
    }

    #[tokio::test]
    async fn test_errors_and_panics_do_not_block_later_items() {
        let processor = processor(5);
        processor.queue().enqueue(start("WIP-bad")).await.unwrap();
        processor.queue().enqueue(start("WIP-panic")).await.unwrap();
        processor.queue().enqueue(start("WIP-good")).await.unwrap();

        let submitter = Recorder::new(|call| match call {
            "start:WIP-bad" => Err(anyhow::anyhow!("connection refused")),
            "start:WIP-panic" => panic!("malformed payload"),
            _ => Ok(true),
        });

        let summary = processor.process_queue(&submitter, None).await;
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.retained_count, 2);

        let remaining = processor.queue().list_pending().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|i| i.retry_count == 1));
    }

    #[tokio::test]
    async fn test_progress_reported_after_each_item() {
        let processor = processor(5);
        for i in 0..3 {
            processor.queue().enqueue(start(&format!("WIP-{}", i))).await.unwrap();
        }

        let seen = StdMutex::new(Vec::new());
        let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
        let submitter = Recorder::new(|_| Ok(true));
        processor.process_queue(&submitter, Some(&progress)).await;

        assert_eq!(*seen.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let processor = processor(5);
        let submitter = Recorder::new(|_| Ok(true));
        let summary = processor.process_queue(&submitter, None).await;
        assert_eq!(summary, DrainSummary::default());
        assert!(submitter.calls().is_empty());
    }

    /// Blocks inside the first submission until released
    struct Gate {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ActionSubmitter for Gate {
        async fn submit_start(&self, _payload: &StartPayload) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(true)
        }

        async fn submit_complete(&self, _payload: &CompletePayload) -> anyhow::Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_try_process_skips_while_draining() {
        let processor = Arc::new(processor(5));
        processor.queue().enqueue(start("WIP-1")).await.unwrap();

        let gate = Arc::new(Gate {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            calls: AtomicUsize::new(0),
        });

        let running = {
            let processor = processor.clone();
            let gate = gate.clone();
            tokio::spawn(async move { processor.process_queue(gate.as_ref(), None).await })
        };

        gate.entered.notified().await;
        assert!(processor.is_draining());
        assert!(processor.try_process_queue(gate.as_ref(), None).await.is_none());

        gate.release.notify_one();
        let summary = running.await.unwrap();
        assert_eq!(summary.success_count, 1);
        assert!(!processor.is_draining());
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }
}
