//! Notifications emitted by the item processor, and the message templates
//! behind them.
//!
//! The core only produces English templates plus a stable i18n key per
//! message; localization is left to whoever renders the notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{FailureSource, ItemType, NotificationSink};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

/// Subsystem a notification originates from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    #[default]
    Knowledge,
}

/// Every user-facing message the core produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    /// Title of a success notification.
    StatusCompleted,
    /// Body of a success notification (`{type}`).
    ItemAdded,
    /// Title of a failure notification.
    KnowledgeBase,
    /// Body of a failure notification (`{error}`).
    ItemFailed,
    /// Error prefix for preprocessing failures.
    PreprocessFailed,
    /// Error prefix for embedding failures.
    EmbeddingFailed,
}

impl MessageKey {
    /// Stable key for the UI's translation tables.
    pub fn i18n_key(&self) -> &'static str {
        match self {
            MessageKey::StatusCompleted => "knowledge.status_completed",
            MessageKey::ItemAdded => "notification.knowledge.success",
            MessageKey::KnowledgeBase => "common.knowledge_base",
            MessageKey::ItemFailed => "notification.knowledge.error",
            MessageKey::PreprocessFailed => "knowledge.status_preprocess_failed",
            MessageKey::EmbeddingFailed => "knowledge.status_embedding_failed",
        }
    }

    /// English template. Placeholders are `{type}` and `{error}`.
    pub fn template(&self) -> &'static str {
        match self {
            MessageKey::StatusCompleted => "Processed",
            MessageKey::ItemAdded => "Added {type} to the knowledge base",
            MessageKey::KnowledgeBase => "Knowledge Base",
            MessageKey::ItemFailed => "Failed to add to the knowledge base: {error}",
            MessageKey::PreprocessFailed => "Preprocessing failed: ",
            MessageKey::EmbeddingFailed => "Embedding failed: ",
        }
    }

    /// Error prefix for a backend failure source.
    pub fn for_failure(source: FailureSource) -> Self {
        match source {
            FailureSource::Preprocess => MessageKey::PreprocessFailed,
            FailureSource::Embedding => MessageKey::EmbeddingFailed,
        }
    }
}

/// Human-readable error for a failed ingestion outcome.
///
/// Backend `failed` results without a source are attributed to embedding.
pub fn failure_message(source: Option<FailureSource>, message: &str) -> String {
    let key = MessageKey::for_failure(source.unwrap_or(FailureSource::Embedding));
    format!("{}{}", key.template(), message)
}

/// A success or failure event for the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification identifier (UUIDv7 for temporal ordering).
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Template the message was rendered from.
    pub key: MessageKey,
    pub source: NotificationSource,
    pub timestamp: DateTime<Utc>,
    pub silent: bool,
}

impl Notification {
    fn new(kind: NotificationKind, title: MessageKey, key: MessageKey, message: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            title: title.template().to_string(),
            message,
            key,
            source: NotificationSource::Knowledge,
            timestamp: Utc::now(),
            silent: false,
        }
    }

    /// An item was ingested.
    pub fn item_completed(item_type: ItemType) -> Self {
        let message = MessageKey::ItemAdded
            .template()
            .replace("{type}", item_type.as_str());
        Self::new(
            NotificationKind::Success,
            MessageKey::StatusCompleted,
            MessageKey::ItemAdded,
            message,
        )
    }

    /// An item attempt failed.
    pub fn item_failed(error: &str) -> Self {
        let message = MessageKey::ItemFailed.template().replace("{error}", error);
        Self::new(
            NotificationKind::Error,
            MessageKey::KnowledgeBase,
            MessageKey::ItemFailed,
            message,
        )
    }
}

/// Broadcast-based notification sink.
///
/// Each subscriber gets its own stream. Notifications sent with no active
/// subscriber are dropped.
#[derive(Clone)]
pub struct BroadcastNotificationSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotificationSink {
    /// Create a new sink with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to receive notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new(crate::defaults::NOTIFICATION_BUS_CAPACITY)
    }
}

impl NotificationSink for BroadcastNotificationSink {
    fn send(&self, notification: Notification) {
        tracing::debug!(
            id = %notification.id,
            kind = ?notification.kind,
            subscriber_count = self.tx.receiver_count(),
            "Notification emit"
        );
        let _ = self.tx.send(notification);
    }
}
