//! Collaborator traits the scheduler is written against.
//!
//! These traits define the interfaces that concrete stores, backends, and
//! notification channels implement, keeping the scheduler free of any
//! particular state-management or transport library.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    IngestionOutcome, IngestionRequest, ItemPatch, KnowledgeBase, NoteContent, Notification,
    Result,
};

// =============================================================================
// ITEM STORE
// =============================================================================

/// Repository holding knowledge bases and their items.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Snapshot of every base, items included.
    async fn list_bases(&self) -> Result<Vec<KnowledgeBase>>;

    /// Snapshot of one base, or `None` if it no longer exists.
    async fn get_base(&self, base_id: Uuid) -> Result<Option<KnowledgeBase>>;

    /// Apply a partial update to one item.
    async fn patch_item(&self, base_id: Uuid, item_id: Uuid, patch: ItemPatch) -> Result<()>;

    /// Drop processing bookkeeping of completed items in a base.
    async fn clear_completed(&self, base_id: Uuid) -> Result<()>;
}

// =============================================================================
// NOTE CONTENT STORE
// =============================================================================

/// Store of full note bodies, keyed by note item id.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Latest body of a note, if any.
    async fn get(&self, note_id: Uuid) -> Result<Option<NoteContent>>;
}

// =============================================================================
// INGESTION BACKEND
// =============================================================================

/// Progress callback type for ingestion backends.
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

/// Context handed to the ingestion backend for one attempt.
pub struct IngestionContext {
    /// The request being processed.
    pub request: IngestionRequest,
    progress_callback: Option<ProgressCallback>,
}

impl IngestionContext {
    /// Create a new ingestion context.
    pub fn new(request: IngestionRequest) -> Self {
        Self {
            request,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress (0 to 100) to the callback.
    pub fn report_progress(&self, percent: u8) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent.min(100));
        }
    }
}

/// Performs the content-to-vector (or preprocess) work for one item.
#[async_trait]
pub trait IngestionBackend: Send + Sync {
    /// Ingest one item. `Err` is treated like a `failed` outcome with no known source.
    async fn add(&self, ctx: IngestionContext) -> Result<IngestionOutcome>;
}

// =============================================================================
// NOTIFICATION SINK
// =============================================================================

/// Receives human-readable success/failure notifications.
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification. Delivery is best-effort.
    fn send(&self, notification: Notification);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EmbeddingConfig, KnowledgeItem};
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    fn request() -> IngestionRequest {
        let base = crate::KnowledgeBase::new("b", EmbeddingConfig::default());
        let item = KnowledgeItem::note(base.id);
        IngestionRequest {
            base: base.params(),
            item,
            user_id: None,
        }
    }

    #[test]
    fn test_report_progress_without_callback() {
        let ctx = IngestionContext::new(request());
        ctx.report_progress(50);
    }

    #[test]
    fn test_report_progress_invokes_callback() {
        let seen = Arc::new(AtomicU8::new(0));
        let seen_cb = seen.clone();
        let ctx = IngestionContext::new(request())
            .with_progress_callback(move |p| seen_cb.store(p, Ordering::SeqCst));

        ctx.report_progress(40);
        assert_eq!(seen.load(Ordering::SeqCst), 40);

        ctx.report_progress(180);
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
