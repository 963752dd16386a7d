//! Submit-or-queue façade tying the queue to connectivity
//!
//! Screens call [`OfflineSync::submit_or_enqueue`] for every operator action.
//! While online the action goes straight to the backend; anything that does
//! not get through lands in the offline queue and is replayed by the drain
//! that [`OfflineSync::attach`] triggers on reconnect.

use crate::connectivity::{ConnectivityMonitor, NetworkListeners};
use crate::queue::{ActionSubmitter, DrainSummary, OperationQueue, ProgressFn, QueueProcessor, QueuedAction};
use crate::storage::StorageError;
use log::{debug, info, warn};
use std::sync::Arc;

/// Where an action ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted,
    Queued { id: String },
}

#[derive(Clone)]
pub struct OfflineSync {
    processor: Arc<QueueProcessor>,
    submitter: Arc<dyn ActionSubmitter>,
    monitor: ConnectivityMonitor,
}

impl OfflineSync {
    pub fn new(queue: Arc<OperationQueue>, submitter: Arc<dyn ActionSubmitter>, monitor: ConnectivityMonitor) -> Self {
        Self {
            processor: Arc::new(QueueProcessor::new(queue)),
            submitter,
            monitor,
        }
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        self.processor.queue()
    }

    pub fn processor(&self) -> &Arc<QueueProcessor> {
        &self.processor
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /// Send `action` now if online, otherwise (or on failure) queue it
    ///
    /// An action whose WIP item still has queued actions is queued behind
    /// them even while online, so a `complete` never overtakes its `start`.
    /// Only a storage failure is reported as an error; at that point the
    /// action is lost and the caller must tell the operator.
    pub async fn submit_or_enqueue(&self, action: QueuedAction) -> Result<SubmitOutcome, StorageError> {
        let waiting = self.pending_for(action.wip_id()).await?;
        if waiting > 0 {
            info!(
                "Queueing {} for {} behind {} pending actions",
                action.operation_type(),
                action.wip_id(),
                waiting
            );
        } else if self.monitor.is_online() {
            match self.submitter.submit(&action).await {
                Ok(true) => {
                    debug!("Submitted {} for {} directly", action.operation_type(), action.wip_id());
                    return Ok(SubmitOutcome::Submitted);
                }
                Ok(false) => info!(
                    "Backend did not accept {} for {}, queueing",
                    action.operation_type(),
                    action.wip_id()
                ),
                Err(e) => warn!(
                    "Direct {} for {} failed, queueing: {:#}",
                    action.operation_type(),
                    action.wip_id(),
                    e
                ),
            }
        } else {
            debug!("Offline, queueing {} for {}", action.operation_type(), action.wip_id());
        }

        let id = self.queue().enqueue(action).await?;
        Ok(SubmitOutcome::Queued { id })
    }

    /// Drain the queue now, waiting for any running drain to finish first
    pub async fn drain_now(&self, on_progress: Option<ProgressFn<'_>>) -> DrainSummary {
        self.processor.process_queue(self.submitter.as_ref(), on_progress).await
    }

    pub async fn pending_count(&self) -> Result<usize, StorageError> {
        self.queue().count().await
    }

    async fn pending_for(&self, wip_id: &str) -> Result<usize, StorageError> {
        let items = self.queue().list_pending().await?;
        Ok(items.iter().filter(|item| item.action.wip_id() == wip_id).count())
    }

    /// Drain automatically whenever the monitor goes back online
    ///
    /// Must be called from within a Tokio runtime; drains are spawned onto
    /// it. A reconnect during a running drain does not start a second one.
    /// Dropping the returned guard stops the automatic drains.
    pub fn attach(&self) -> NetworkListeners {
        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() {
            warn!("No Tokio runtime available, reconnect drains are disabled");
        }

        let processor = self.processor.clone();
        let submitter = self.submitter.clone();

        self.monitor.setup_network_listeners(
            move || {
                let Some(runtime) = runtime.as_ref() else {
                    return;
                };
                let processor = processor.clone();
                let submitter = submitter.clone();
                runtime.spawn(async move {
                    match processor.try_process_queue(submitter.as_ref(), None).await {
                        Some(summary) => debug!("Reconnect drain finished: {:?}", summary),
                        None => debug!("Reconnect drain skipped, one is already running"),
                    }
                });
            },
            || debug!("Offline, actions will be queued"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{CompletePayload, ProcessResult, StartPayload};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Backend {
        accept: AtomicBool,
        fail_hard: AtomicBool,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl Backend {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                accept: AtomicBool::new(accept),
                fail_hard: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn answer(&self, call: String) -> anyhow::Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(call);
            if self.fail_hard.load(Ordering::SeqCst) {
                anyhow::bail!("connection reset");
            }
            Ok(self.accept.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl ActionSubmitter for Backend {
        async fn submit_start(&self, payload: &StartPayload) -> anyhow::Result<bool> {
            self.answer(format!("start:{}", payload.wip_id))
        }

        async fn submit_complete(&self, payload: &CompletePayload) -> anyhow::Result<bool> {
            self.answer(format!("complete:{}", payload.wip_id))
        }
    }

    fn start(wip: &str) -> QueuedAction {
        QueuedAction::Start(StartPayload {
            wip_id: wip.to_string(),
            process_id: "PRC-7".to_string(),
            worker_id: "OP-3".to_string(),
        })
    }

    fn complete(wip: &str) -> QueuedAction {
        QueuedAction::Complete(CompletePayload {
            wip_id: wip.to_string(),
            process_id: "PRC-7".to_string(),
            worker_id: "OP-3".to_string(),
            result: ProcessResult::Pass,
            measurement_data: None,
            notes: None,
        })
    }

    fn sync_with(backend: Arc<Backend>, online: bool) -> OfflineSync {
        let queue = Arc::new(OperationQueue::new(Arc::new(MemoryStore::new())));
        OfflineSync::new(queue, backend, ConnectivityMonitor::new(online))
    }

    #[tokio::test]
    async fn test_offline_queues_without_attempting() {
        let backend = Backend::new(true);
        let sync = sync_with(backend.clone(), false);

        let outcome = sync.submit_or_enqueue(start("WIP-1")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sync.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_online_success_skips_queue() {
        let backend = Backend::new(true);
        let sync = sync_with(backend.clone(), true);

        let outcome = sync.submit_or_enqueue(start("WIP-1")).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Submitted);
        assert_eq!(sync.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_online_rejection_or_error_queues() {
        let backend = Backend::new(false);
        let sync = sync_with(backend.clone(), true);

        let rejected = sync.submit_or_enqueue(start("WIP-1")).await.unwrap();
        backend.fail_hard.store(true, Ordering::SeqCst);
        let errored = sync.submit_or_enqueue(start("WIP-2")).await.unwrap();

        let SubmitOutcome::Queued { id } = rejected else {
            panic!("expected queued outcome");
        };
        assert!(sync.queue().get(&id).await.unwrap().is_some());
        assert!(matches!(errored, SubmitOutcome::Queued { .. }));
        assert_eq!(sync.pending_count().await.unwrap(), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_online_action_waits_behind_queued_same_wip() {
        let backend = Backend::new(true);
        let sync = sync_with(backend.clone(), true);
        sync.queue().enqueue(start("WIP-1")).await.unwrap();

        let outcome = sync.submit_or_enqueue(complete("WIP-1")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        // Other work items are not held back
        let other = sync.submit_or_enqueue(start("WIP-2")).await.unwrap();
        assert_eq!(other, SubmitOutcome::Submitted);

        sync.drain_now(None).await;
        assert_eq!(
            *backend.seen.lock().unwrap(),
            vec!["start:WIP-2", "start:WIP-1", "complete:WIP-1"]
        );
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue() {
        let backend = Backend::new(true);
        let sync = sync_with(backend.clone(), false);
        let _listeners = sync.attach();

        sync.submit_or_enqueue(start("WIP-1")).await.unwrap();
        sync.submit_or_enqueue(start("WIP-2")).await.unwrap();

        assert!(sync.monitor().set_online(true));
        for _ in 0..100 {
            if sync.pending_count().await.unwrap() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(sync.pending_count().await.unwrap(), 0);
        assert_eq!(*backend.seen.lock().unwrap(), vec!["start:WIP-1", "start:WIP-2"]);
    }

    #[tokio::test]
    async fn test_detached_sync_does_not_drain() {
        let backend = Backend::new(true);
        let sync = sync_with(backend.clone(), false);
        sync.attach().teardown();

        sync.submit_or_enqueue(start("WIP-1")).await.unwrap();
        sync.monitor().set_online(true);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(sync.pending_count().await.unwrap(), 1);

        let summary = sync.drain_now(None).await;
        assert_eq!(summary.success_count, 1);
    }
}
