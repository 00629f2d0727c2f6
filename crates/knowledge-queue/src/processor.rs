//! Item processor: drives one knowledge item through a single attempt.
//!
//! An attempt has two halves. [`ItemProcessor::claim`] moves the item to
//! `processing` and spends one unit of its retry budget; the scheduler loop
//! awaits it so the item is no longer eligible when the next selection runs.
//! [`ItemProcessor::run_attempt`] does the backend call and writes the
//! terminal status; the scheduler spawns it and moves on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use knowledge_core::notification::failure_message;
use knowledge_core::{
    Error, IngestionBackend, IngestionContext, IngestionOutcome, IngestionRequest, ItemContent,
    ItemPatch, ItemStore, ItemType, KnowledgeItem, NoteStore, Notification, NotificationSink,
    Result,
};

use crate::events::QueueEvent;
use crate::retry::RetryPolicy;

/// A claimed attempt: the item is `processing` and its retry count was bumped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub base_id: Uuid,
    pub item_id: Uuid,
    pub item_type: ItemType,
    /// Retry count after the claim.
    pub number: u32,
}

/// What a finished backend call yielded.
struct Ingested {
    outcome: IngestionOutcome,
    preprocessed: bool,
}

/// Drives single items through their status lifecycle.
pub struct ItemProcessor {
    store: Arc<dyn ItemStore>,
    notes: Arc<dyn NoteStore>,
    backend: Arc<dyn IngestionBackend>,
    notifier: Arc<dyn NotificationSink>,
    policy: RetryPolicy,
    user_id: Option<String>,
    ingest_timeout: Option<Duration>,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl ItemProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ItemStore>,
        notes: Arc<dyn NoteStore>,
        backend: Arc<dyn IngestionBackend>,
        notifier: Arc<dyn NotificationSink>,
        policy: RetryPolicy,
        user_id: Option<String>,
        ingest_timeout: Option<Duration>,
        event_tx: broadcast::Sender<QueueEvent>,
    ) -> Self {
        Self {
            store,
            notes,
            backend,
            notifier,
            policy,
            user_id,
            ingest_timeout,
            event_tx,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run a full attempt for one item and wait for it to finish.
    ///
    /// Failures are recorded on the item and notified; nothing is returned.
    pub async fn process_item(&self, base_id: Uuid, item: &KnowledgeItem) {
        match self.claim(base_id, item).await {
            Ok(Some(attempt)) => self.run_attempt(attempt).await,
            Ok(None) => {}
            Err(e) => {
                error!(%base_id, item_id = %item.id, error = %e, "Failed to claim item");
            }
        }
    }

    /// Move an item to `processing` and count the attempt.
    ///
    /// Returns `None` without touching the store when the item's retry budget
    /// is already spent.
    pub async fn claim(&self, base_id: Uuid, item: &KnowledgeItem) -> Result<Option<Attempt>> {
        if !self.policy.can_attempt(item) {
            debug!(
                %base_id,
                item_id = %item.id,
                retry_count = item.attempts(),
                max_retries = self.policy.max_retries(),
                "Retry budget exhausted, skipping item"
            );
            return Ok(None);
        }

        let number = item.attempts() + 1;
        self.store
            .patch_item(base_id, item.id, ItemPatch::processing(number))
            .await?;

        let _ = self.event_tx.send(QueueEvent::ItemStarted {
            base_id,
            item_id: item.id,
            attempt: number,
        });

        Ok(Some(Attempt {
            base_id,
            item_id: item.id,
            item_type: item.item_type,
            number,
        }))
    }

    /// Ingest a claimed item and record the terminal status.
    pub async fn run_attempt(&self, attempt: Attempt) {
        let start = Instant::now();
        info!(
            base_id = %attempt.base_id,
            item_id = %attempt.item_id,
            item_type = %attempt.item_type,
            attempt = attempt.number,
            "Processing knowledge item"
        );

        match self.ingest(&attempt).await {
            Ok(Ingested {
                outcome:
                    IngestionOutcome::Success {
                        unique_id,
                        unique_ids,
                    },
                preprocessed,
            }) => {
                let patch = ItemPatch::completed(unique_id, unique_ids, preprocessed);
                self.complete(&attempt, patch, start).await;
            }
            Ok(Ingested {
                outcome: IngestionOutcome::Failed { message, source },
                ..
            }) => {
                self.fail(&attempt, failure_message(source, &message), start)
                    .await;
            }
            Err(e) => {
                self.fail(&attempt, e.to_string(), start).await;
            }
        }
    }

    /// Re-read the live base and item, build the request, call the backend.
    async fn ingest(&self, attempt: &Attempt) -> Result<Ingested> {
        let base = self
            .store
            .get_base(attempt.base_id)
            .await?
            .ok_or(Error::BaseNotFound(attempt.base_id))?;

        let mut item = base
            .item(attempt.item_id)
            .cloned()
            .ok_or(Error::ItemNotFound {
                base_id: attempt.base_id,
                item_id: attempt.item_id,
            })?;

        if item.item_type == ItemType::Note {
            let note = self
                .notes
                .get(item.id)
                .await?
                .ok_or(Error::NoteNotFound(item.id))?;
            item.content = ItemContent::Text(note.content);
        }

        let request = IngestionRequest {
            base: base.params(),
            item,
            user_id: self.user_id.clone(),
        };

        let event_tx = self.event_tx.clone();
        let (base_id, item_id) = (attempt.base_id, attempt.item_id);
        let ctx = IngestionContext::new(request).with_progress_callback(move |percent| {
            let _ = event_tx.send(QueueEvent::ItemProgress {
                base_id,
                item_id,
                percent,
            });
        });

        let outcome = match self.ingest_timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.add(ctx))
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => self.backend.add(ctx).await?,
        };

        Ok(Ingested {
            outcome,
            preprocessed: base.has_preprocess_provider(),
        })
    }

    async fn complete(&self, attempt: &Attempt, patch: ItemPatch, start: Instant) {
        if let Err(e) = self
            .store
            .patch_item(attempt.base_id, attempt.item_id, patch)
            .await
        {
            error!(
                base_id = %attempt.base_id,
                item_id = %attempt.item_id,
                error = %e,
                "Failed to record completed item"
            );
            self.fail(attempt, e.to_string(), start).await;
            return;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            base_id = %attempt.base_id,
            item_id = %attempt.item_id,
            attempt = attempt.number,
            duration_ms,
            "Knowledge item processed"
        );

        self.notifier
            .send(Notification::item_completed(attempt.item_type));
        let _ = self.event_tx.send(QueueEvent::ItemCompleted {
            base_id: attempt.base_id,
            item_id: attempt.item_id,
            duration_ms,
        });

        if let Err(e) = self.store.clear_completed(attempt.base_id).await {
            warn!(base_id = %attempt.base_id, error = %e, "Failed to clear completed items");
        }
    }

    async fn fail(&self, attempt: &Attempt, message: String, start: Instant) {
        let dead_letter = attempt.number >= self.policy.max_retries();
        warn!(
            base_id = %attempt.base_id,
            item_id = %attempt.item_id,
            attempt = attempt.number,
            dead_letter,
            error = %message,
            duration_ms = start.elapsed().as_millis() as u64,
            "Knowledge item failed"
        );

        if let Err(e) = self
            .store
            .patch_item(
                attempt.base_id,
                attempt.item_id,
                ItemPatch::failed(message.clone(), attempt.number),
            )
            .await
        {
            error!(
                base_id = %attempt.base_id,
                item_id = %attempt.item_id,
                error = %e,
                "Failed to record failed item"
            );
        }

        self.notifier.send(Notification::item_failed(&message));
        let _ = self.event_tx.send(QueueEvent::ItemFailed {
            base_id: attempt.base_id,
            item_id: attempt.item_id,
            error: message,
            dead_letter,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryItemStore, MemoryNoteStore};
    use crate::mock::{MockIngestionBackend, MockResponse};
    use knowledge_core::{
        BroadcastNotificationSink, EmbeddingConfig, FailureSource, KnowledgeBase,
        NotificationKind, PreprocessProvider, ProcessingStatus,
    };

    struct Fixture {
        store: MemoryItemStore,
        notes: MemoryNoteStore,
        backend: MockIngestionBackend,
        notifier: BroadcastNotificationSink,
        events: broadcast::Sender<QueueEvent>,
    }

    impl Fixture {
        fn new() -> Self {
            let (events, _) = broadcast::channel(64);
            Self {
                store: MemoryItemStore::new(),
                notes: MemoryNoteStore::new(),
                backend: MockIngestionBackend::new(),
                notifier: BroadcastNotificationSink::new(16),
                events,
            }
        }

        fn processor(&self, max_retries: u32) -> ItemProcessor {
            ItemProcessor::new(
                Arc::new(self.store.clone()),
                Arc::new(self.notes.clone()),
                Arc::new(self.backend.clone()),
                Arc::new(self.notifier.clone()),
                RetryPolicy::new(max_retries),
                Some("user-1".to_string()),
                None,
                self.events.clone(),
            )
        }

        async fn base_with(&self, items: Vec<KnowledgeItem>) -> Uuid {
            let base = KnowledgeBase::new("test", EmbeddingConfig::default());
            let base_id = base.id;
            self.store.insert_base(base).await;
            for item in items {
                self.store.add_item(base_id, item).await.unwrap();
            }
            base_id
        }
    }

    fn url_item(base_id: Uuid) -> KnowledgeItem {
        KnowledgeItem::new(
            base_id,
            ItemType::Url,
            ItemContent::Text("https://example.com".to_string()),
        )
    }

    #[tokio::test]
    async fn test_success_records_unique_id_and_notifies() {
        let fx = Fixture::new();
        let mut notifications = fx.notifier.subscribe();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();

        fx.processor(1).process_item(base_id, &item).await;

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Completed);
        assert_eq!(stored.retry_count, Some(1));
        assert!(stored.unique_id.is_some());
        assert_eq!(stored.is_preprocessed, Some(false));
        // clear_completed ran after the success
        assert!(stored.processing_progress.is_none());

        let n = notifications.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::Success);
    }

    #[tokio::test]
    async fn test_preprocess_provider_marks_item_preprocessed() {
        let fx = Fixture::new();
        let base = KnowledgeBase::new("ocr", EmbeddingConfig::default()).with_preprocess_provider(
            PreprocessProvider {
                id: "doc2x".to_string(),
                name: "Doc2x".to_string(),
                api_host: None,
            },
        );
        let base_id = base.id;
        fx.store.insert_base(base).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();

        fx.processor(1).process_item(base_id, &item).await;

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.is_preprocessed, Some(true));
    }

    #[tokio::test]
    async fn test_failed_outcome_is_prefixed_by_source() {
        let fx = Fixture::new();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();
        fx.backend.push_response(
            item.id,
            MockResponse::Outcome(IngestionOutcome::Failed {
                message: "ocr quota".to_string(),
                source: Some(FailureSource::Preprocess),
            }),
        );

        fx.processor(1).process_item(base_id, &item).await;

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            stored.processing_error.as_deref(),
            Some("Preprocessing failed: ocr quota")
        );
        assert_eq!(stored.retry_count, Some(1));
        assert!(stored.unique_id.is_none());
    }

    #[tokio::test]
    async fn test_backend_error_fails_item_without_prefix() {
        let fx = Fixture::new();
        let mut notifications = fx.notifier.subscribe();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();
        fx.backend
            .push_response(item.id, MockResponse::Error("socket closed".to_string()));

        fx.processor(2).process_item(base_id, &item).await;

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            stored.processing_error.as_deref(),
            Some("Ingestion error: socket closed")
        );
        let n = notifications.recv().await.unwrap();
        assert_eq!(n.kind, NotificationKind::Error);
    }

    #[tokio::test]
    async fn test_guard_skips_exhausted_item() {
        let fx = Fixture::new();
        let base_id = fx.base_with(vec![]).await;
        let mut item = url_item(base_id);
        item.retry_count = Some(1);
        fx.store.add_item(base_id, item.clone()).await.unwrap();

        fx.processor(1).process_item(base_id, &item).await;

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Pending);
        assert_eq!(stored.retry_count, Some(1));
        assert_eq!(fx.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_note_content_is_resolved() {
        let fx = Fixture::new();
        let base_id = fx.base_with(vec![]).await;
        let note = KnowledgeItem::note(base_id);
        fx.store.add_item(base_id, note.clone()).await.unwrap();
        fx.notes.put(note.id, "Hello").await;

        fx.processor(1).process_item(base_id, &note).await;

        let calls = fx.backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].item.content.as_text(), Some("Hello"));
        assert_eq!(calls[0].user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_missing_note_fails_attempt() {
        let fx = Fixture::new();
        let base_id = fx.base_with(vec![]).await;
        let note = KnowledgeItem::note(base_id);
        fx.store.add_item(base_id, note.clone()).await.unwrap();

        fx.processor(1).process_item(base_id, &note).await;

        let stored = fx.store.item(base_id, note.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert!(stored
            .processing_error
            .unwrap()
            .starts_with("Note content not found"));
        assert_eq!(fx.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_item_removed_mid_attempt_does_not_panic() {
        let fx = Fixture::new();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();

        let processor = fx.processor(1);
        let attempt = processor.claim(base_id, &item).await.unwrap().unwrap();
        fx.store.remove_item(base_id, item.id).await;
        processor.run_attempt(attempt).await;

        assert!(fx.store.item(base_id, item.id).await.is_none());
        assert_eq!(fx.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_claim_marks_processing_and_emits_event() {
        let fx = Fixture::new();
        let mut events = fx.events.subscribe();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();

        let attempt = fx
            .processor(1)
            .claim(base_id, &item)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.number, 1);

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Processing);
        assert_eq!(stored.retry_count, Some(1));

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            QueueEvent::ItemStarted {
                base_id,
                item_id: item.id,
                attempt: 1
            }
        );
    }

    #[tokio::test]
    async fn test_progress_is_broadcast() {
        let fx = Fixture::new();
        let mut events = fx.events.subscribe();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();

        fx.processor(1).process_item(base_id, &item).await;

        let mut progress = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let QueueEvent::ItemProgress { percent, .. } = event {
                progress.push(percent);
            }
        }
        assert_eq!(progress, vec![50, 100]);
    }

    #[tokio::test]
    async fn test_timeout_fails_attempt() {
        let fx = Fixture::new();
        let base_id = fx.base_with(vec![]).await;
        let item = url_item(base_id);
        fx.store.add_item(base_id, item.clone()).await.unwrap();
        let _gate = fx.backend.hold(item.id);

        let processor = ItemProcessor::new(
            Arc::new(fx.store.clone()),
            Arc::new(fx.notes.clone()),
            Arc::new(fx.backend.clone()),
            Arc::new(fx.notifier.clone()),
            RetryPolicy::new(1),
            None,
            Some(Duration::from_millis(20)),
            fx.events.clone(),
        );
        processor.process_item(base_id, &item).await;

        let stored = fx.store.item(base_id, item.id).await.unwrap();
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(
            stored.processing_error.as_deref(),
            Some("Ingestion timed out after 20ms")
        );
    }
}
