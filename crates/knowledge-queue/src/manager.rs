//! Queue manager: the per-base scheduler.
//!
//! One scheduler loop runs per knowledge base at most. The loop selects the
//! first eligible item in list order, claims it, spawns its attempt, and goes
//! straight back to selection without waiting for the attempt. Several items
//! of one base can therefore be `processing` at the same time; only the
//! selection is serialized.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use knowledge_core::{
    BroadcastNotificationSink, Error, IngestionBackend, ItemStore, KnowledgeItem, NoteStore,
    NotificationSink, Result,
};

use crate::config::QueueConfig;
use crate::events::QueueEvent;
use crate::memory::MemoryNoteStore;
use crate::processor::{Attempt, ItemProcessor};
use crate::retry::RetryPolicy;
use crate::runs::ActiveRuns;

/// Handle for controlling a running background queue.
pub struct QueueHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<QueueEvent>,
    task: JoinHandle<()>,
}

impl QueueHandle {
    /// Signal the polling loop to stop and wait for it to exit.
    ///
    /// Attempts already dispatched keep running; see [`QueueManager::wait_idle`].
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Queue task failed: {e}")))
    }

    /// Get a receiver for queue events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_rx.resubscribe()
    }
}

/// Per-base ingestion scheduler. Clones share runs, tasks, and collaborators.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn ItemStore>,
    processor: Arc<ItemProcessor>,
    runs: ActiveRuns,
    config: QueueConfig,
    event_tx: broadcast::Sender<QueueEvent>,
    /// Dispatched attempts. Tracked tasks are detached, never aborted, when
    /// the manager goes away.
    tasks: TaskTracker,
}

impl QueueManager {
    /// Start a builder over the two required collaborators.
    pub fn builder(
        store: Arc<dyn ItemStore>,
        backend: Arc<dyn IngestionBackend>,
    ) -> QueueManagerBuilder {
        QueueManagerBuilder::new(store, backend)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn policy(&self) -> RetryPolicy {
        self.processor.policy()
    }

    /// The active-run registry this manager schedules against.
    pub fn active_runs(&self) -> &ActiveRuns {
        &self.runs
    }

    /// Get a receiver for queue events.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Whether a scheduler run is active for the base.
    pub fn is_processing(&self, base_id: Uuid) -> bool {
        self.runs.is_active(base_id)
    }

    /// Scan every base and start a run for each one with eligible items and
    /// no active run. Bases are driven concurrently.
    pub async fn check_all_bases(&self) {
        let bases = match self.store.list_bases().await {
            Ok(bases) => bases,
            Err(e) => {
                error!(error = %e, "Failed to list knowledge bases");
                return;
            }
        };

        let policy = self.policy();
        // Pre-filter only; `process_queue` re-checks when it acquires the run.
        let runs: Vec<_> = bases
            .iter()
            .filter(|base| base.items.iter().any(|item| policy.is_eligible(item)))
            .filter(|base| !self.runs.is_active(base.id))
            .map(|base| self.process_queue(base.id))
            .collect();

        debug!(bases = bases.len(), starting = runs.len(), "Checked all bases");
        join_all(runs).await;
    }

    /// Run the scheduler loop for one base.
    ///
    /// Returns immediately if a run is already active for the base. Otherwise
    /// keeps dispatching eligible items until none remain or the run is
    /// stopped. Returns once selection ends, not when attempts finish.
    #[instrument(skip(self))]
    pub async fn process_queue(&self, base_id: Uuid) {
        let Some(run) = self.runs.try_acquire(base_id) else {
            info!(%base_id, "Queue already processing for base, skipping");
            return;
        };

        info!(%base_id, "Queue run started");
        let _ = self.event_tx.send(QueueEvent::RunStarted { base_id });

        let policy = self.policy();
        let mut dispatched = 0usize;
        // Items the processor refused to claim; without this a pending item
        // with a spent budget would be selected forever.
        let mut skipped: HashSet<Uuid> = HashSet::new();

        while run.is_current() {
            let item = match self.next_eligible(base_id, policy, &skipped).await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => {
                    error!(%base_id, error = %e, "Failed to read knowledge base");
                    break;
                }
            };
            trace!(%base_id, item_id = %item.id, "Selected item");

            match self.processor.claim(base_id, &item).await {
                Ok(Some(attempt)) => {
                    self.dispatch(attempt);
                    dispatched += 1;
                }
                Ok(None) => {
                    skipped.insert(item.id);
                }
                Err(e) => {
                    error!(%base_id, item_id = %item.id, error = %e, "Failed to claim item");
                    break;
                }
            }
        }

        let stopped = !run.is_current();
        drop(run);

        info!(%base_id, dispatched, stopped, "Queue run finished");
        let _ = self.event_tx.send(QueueEvent::RunFinished {
            base_id,
            dispatched,
            stopped,
        });
    }

    /// First eligible item of the base in its current list order.
    async fn next_eligible(
        &self,
        base_id: Uuid,
        policy: RetryPolicy,
        skipped: &HashSet<Uuid>,
    ) -> Result<Option<KnowledgeItem>> {
        let Some(base) = self.store.get_base(base_id).await? else {
            warn!(%base_id, "Knowledge base disappeared during run");
            return Ok(None);
        };
        Ok(base
            .items
            .into_iter()
            .find(|item| !skipped.contains(&item.id) && policy.is_eligible(item)))
    }

    /// Spawn an attempt without waiting for it.
    fn dispatch(&self, attempt: Attempt) {
        let processor = self.processor.clone();
        self.tasks.spawn(async move {
            processor.run_attempt(attempt).await;
        });
    }

    /// Run one item's full attempt and wait for it.
    pub async fn process_item(&self, base_id: Uuid, item: &KnowledgeItem) {
        self.processor.process_item(base_id, item).await;
    }

    /// Wait until every dispatched attempt has finished.
    ///
    /// Attempts dispatched while waiting are waited for too. Cancelling the
    /// wait leaves the attempts running.
    pub async fn wait_idle(&self) {
        // A closed tracker still accepts spawns; closing only lets `wait` resolve.
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Stop selecting new items for a base. In-flight attempts run to completion.
    pub fn stop_processing(&self, base_id: Uuid) {
        if self.runs.stop(base_id) {
            info!(%base_id, "Queue processing stopped for base");
        }
    }

    /// Stop selecting new items for every active base.
    pub fn stop_all_processing(&self) {
        let stopped = self.runs.stop_all();
        if !stopped.is_empty() {
            info!(count = stopped.len(), "Queue processing stopped for all bases");
        }
    }

    /// Start background polling and return a handle for control.
    pub fn start(&self) -> QueueHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let manager = self.clone();
        let task = tokio::spawn(async move {
            manager.run(&mut shutdown_rx).await;
        });

        QueueHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Sweep all bases every poll interval until shut down.
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Knowledge queue is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_retries = self.config.max_retries,
            "Knowledge queue started"
        );
        let _ = self.event_tx.send(QueueEvent::QueueStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            self.check_all_bases().await;

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Knowledge queue received shutdown signal");
                    break;
                }
                _ = sleep(poll_interval) => {}
            }
        }

        self.stop_all_processing();
        let _ = self.event_tx.send(QueueEvent::QueueStopped);
        info!("Knowledge queue stopped");
    }
}

/// Builder for a [`QueueManager`].
pub struct QueueManagerBuilder {
    store: Arc<dyn ItemStore>,
    backend: Arc<dyn IngestionBackend>,
    notes: Option<Arc<dyn NoteStore>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    runs: Option<ActiveRuns>,
    config: QueueConfig,
}

impl QueueManagerBuilder {
    /// Create a new builder.
    pub fn new(store: Arc<dyn ItemStore>, backend: Arc<dyn IngestionBackend>) -> Self {
        Self {
            store,
            backend,
            notes: None,
            notifier: None,
            runs: None,
            config: QueueConfig::default(),
        }
    }

    /// Set the queue configuration.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the note content store. Defaults to an empty in-memory store.
    pub fn with_note_store(mut self, notes: Arc<dyn NoteStore>) -> Self {
        self.notes = Some(notes);
        self
    }

    /// Set the notification sink. Defaults to a broadcast sink nobody listens to.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Share an existing active-run registry.
    pub fn with_active_runs(mut self, runs: ActiveRuns) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Build the manager.
    pub fn build(self) -> QueueManager {
        let (event_tx, _) = broadcast::channel(knowledge_core::defaults::EVENT_BUS_CAPACITY);
        let notes = self
            .notes
            .unwrap_or_else(|| Arc::new(MemoryNoteStore::new()));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(BroadcastNotificationSink::default()));

        let processor = ItemProcessor::new(
            self.store.clone(),
            notes,
            self.backend,
            notifier,
            RetryPolicy::new(self.config.max_retries),
            self.config.user_id.clone(),
            self.config.ingest_timeout(),
            event_tx.clone(),
        );

        QueueManager {
            store: self.store,
            processor: Arc::new(processor),
            runs: self.runs.unwrap_or_default(),
            config: self.config,
            event_tx,
            tasks: TaskTracker::new(),
        }
    }
}
