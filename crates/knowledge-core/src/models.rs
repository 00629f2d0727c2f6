//! Data model for knowledge bases and their ingestible items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ITEMS
// =============================================================================

/// Kind of content a knowledge item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Note,
    File,
    Url,
    Sitemap,
    Directory,
    Memory,
    Video,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Note => "note",
            ItemType::File => "file",
            ItemType::Url => "url",
            ItemType::Sitemap => "sitemap",
            ItemType::Directory => "directory",
            ItemType::Memory => "memory",
            ItemType::Video => "video",
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing lifecycle of a knowledge item.
///
/// `pending → processing → completed | failed`, with `failed → processing`
/// allowed while the retry budget lasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Whether the status ends an attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }
}

/// Reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
}

/// Type-dependent payload of a knowledge item.
///
/// Notes store only a reference here; their body lives in the note content
/// store and is resolved right before ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemContent {
    /// Raw text: note reference/body, URL, sitemap URL, directory path, memory.
    Text(String),
    /// A single uploaded file.
    File(FileRef),
    /// Several files (video plus subtitles).
    Files(Vec<FileRef>),
}

impl ItemContent {
    /// Text payload, if this content is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ItemContent::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One unit of ingestible content belonging to a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub base_id: Uuid,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub content: ItemContent,
    #[serde(default)]
    pub processing_status: ProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_preprocessed: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Create a new pending item.
    pub fn new(base_id: Uuid, item_type: ItemType, content: ItemContent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            base_id,
            item_type,
            content,
            processing_status: ProcessingStatus::Pending,
            processing_progress: None,
            processing_error: None,
            retry_count: None,
            unique_id: None,
            unique_ids: None,
            is_preprocessed: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pending note item. Its body is looked up by item id at ingestion time.
    pub fn note(base_id: Uuid) -> Self {
        let mut item = Self::new(base_id, ItemType::Note, ItemContent::Text(String::new()));
        item.content = ItemContent::Text(item.id.to_string());
        item
    }

    /// Attempts made so far (unset counts as zero).
    pub fn attempts(&self) -> u32 {
        self.retry_count.unwrap_or(0)
    }

    /// Apply a patch in place.
    ///
    /// A status other than `failed` clears `processing_error`. Success
    /// enrichment fields are only ever set, never cleared.
    pub fn apply(&mut self, patch: ItemPatch) {
        if let Some(status) = patch.processing_status {
            self.processing_status = status;
            if status == ProcessingStatus::Failed {
                self.processing_error = patch.processing_error;
            } else {
                self.processing_error = None;
            }
        }
        if let Some(progress) = patch.processing_progress {
            self.processing_progress = Some(progress.min(100));
        }
        if let Some(count) = patch.retry_count {
            self.retry_count = Some(count);
        }
        if let Some(unique_id) = patch.unique_id {
            self.unique_id = Some(unique_id);
        }
        if let Some(unique_ids) = patch.unique_ids {
            self.unique_ids = Some(unique_ids);
        }
        if let Some(is_preprocessed) = patch.is_preprocessed {
            self.is_preprocessed = Some(is_preprocessed);
        }
        self.updated_at = Utc::now();
    }

    /// Drop processing bookkeeping of a completed item, keeping its status and
    /// success enrichment.
    pub fn clear_processing_state(&mut self) {
        self.processing_progress = None;
        self.processing_error = None;
    }
}

/// Partial update to a knowledge item.
///
/// Enrichment fields (`unique_id`, `unique_ids`, `is_preprocessed`) can be
/// set but never cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_preprocessed: Option<bool>,
}

impl ItemPatch {
    /// Claim an item for an attempt: `processing`, progress reset, new retry count.
    pub fn processing(retry_count: u32) -> Self {
        Self {
            processing_status: Some(ProcessingStatus::Processing),
            processing_progress: Some(crate::defaults::PROGRESS_START),
            retry_count: Some(retry_count),
            ..Default::default()
        }
    }

    /// Mark an attempt successful and record what the backend returned.
    pub fn completed(
        unique_id: Option<String>,
        unique_ids: Option<Vec<String>>,
        is_preprocessed: bool,
    ) -> Self {
        Self {
            processing_status: Some(ProcessingStatus::Completed),
            processing_progress: Some(crate::defaults::PROGRESS_DONE),
            unique_id,
            unique_ids,
            is_preprocessed: Some(is_preprocessed),
            ..Default::default()
        }
    }

    /// Mark an attempt failed.
    pub fn failed(error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            processing_status: Some(ProcessingStatus::Failed),
            processing_error: Some(error.into()),
            retry_count: Some(retry_count),
            ..Default::default()
        }
    }
}

// =============================================================================
// BASES
// =============================================================================

/// Embedding backend configuration. Opaque to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_overlap: Option<u32>,
}

/// Optional document preprocessing step (OCR, document conversion) run before embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessProvider {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_host: Option<String>,
}

/// A named collection of ingested items plus the configuration used to embed them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub items: Vec<KnowledgeItem>,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess_provider: Option<PreprocessProvider>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    /// Create an empty base.
    pub fn new(name: impl Into<String>, embedding: EmbeddingConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            items: Vec::new(),
            embedding,
            preprocess_provider: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the preprocessing provider.
    pub fn with_preprocess_provider(mut self, provider: PreprocessProvider) -> Self {
        self.preprocess_provider = Some(provider);
        self
    }

    /// Look up an item by id.
    pub fn item(&self, item_id: Uuid) -> Option<&KnowledgeItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    /// Look up an item by id for mutation.
    pub fn item_mut(&mut self, item_id: Uuid) -> Option<&mut KnowledgeItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    /// Whether successfully processed items count as preprocessed.
    pub fn has_preprocess_provider(&self) -> bool {
        self.preprocess_provider.is_some()
    }

    /// Projection of the base handed to the ingestion backend.
    pub fn params(&self) -> KnowledgeBaseParams {
        KnowledgeBaseParams {
            id: self.id,
            embedding: self.embedding.clone(),
            preprocess_provider: self.preprocess_provider.clone(),
        }
    }
}

/// Base configuration as passed to the ingestion backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeBaseParams {
    pub id: Uuid,
    pub embedding: EmbeddingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preprocess_provider: Option<PreprocessProvider>,
}

// =============================================================================
// NOTES
// =============================================================================

/// Full body of a note item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteContent {
    pub content: String,
}

// =============================================================================
// INGESTION
// =============================================================================

/// What the ingestion backend receives for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRequest {
    pub base: KnowledgeBaseParams,
    pub item: KnowledgeItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Pipeline stage a backend failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureSource {
    Embedding,
    Preprocess,
}

/// Discriminated result of an ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestionOutcome {
    Success {
        #[serde(default, rename = "uniqueId", skip_serializing_if = "Option::is_none")]
        unique_id: Option<String>,
        #[serde(default, rename = "uniqueIds", skip_serializing_if = "Option::is_none")]
        unique_ids: Option<Vec<String>>,
    },
    Failed {
        message: String,
        #[serde(default, rename = "messageSource", skip_serializing_if = "Option::is_none")]
        source: Option<FailureSource>,
    },
}

impl IngestionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestionOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> KnowledgeBase {
        KnowledgeBase::new(
            "docs",
            EmbeddingConfig {
                provider: "ollama".to_string(),
                model: "nomic-embed-text".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_new_item_is_pending() {
        let item = KnowledgeItem::new(
            Uuid::new_v4(),
            ItemType::Url,
            ItemContent::Text("https://example.com".to_string()),
        );
        assert_eq!(item.processing_status, ProcessingStatus::Pending);
        assert_eq!(item.attempts(), 0);
        assert!(item.unique_id.is_none());
    }

    #[test]
    fn test_note_item_references_itself() {
        let item = KnowledgeItem::note(Uuid::new_v4());
        assert_eq!(item.item_type, ItemType::Note);
        assert_eq!(item.content.as_text(), Some(item.id.to_string().as_str()));
    }

    #[test]
    fn test_apply_failed_sets_error() {
        let mut item = KnowledgeItem::note(Uuid::new_v4());
        item.apply(ItemPatch::failed("boom", 1));
        assert_eq!(item.processing_status, ProcessingStatus::Failed);
        assert_eq!(item.processing_error.as_deref(), Some("boom"));
        assert_eq!(item.retry_count, Some(1));
    }

    #[test]
    fn test_apply_processing_clears_error() {
        let mut item = KnowledgeItem::note(Uuid::new_v4());
        item.apply(ItemPatch::failed("boom", 1));
        item.apply(ItemPatch::processing(2));
        assert_eq!(item.processing_status, ProcessingStatus::Processing);
        assert!(item.processing_error.is_none());
        assert_eq!(item.retry_count, Some(2));
        assert_eq!(item.processing_progress, Some(0));
    }

    #[test]
    fn test_failure_never_clears_unique_id() {
        let mut item = KnowledgeItem::note(Uuid::new_v4());
        item.apply(ItemPatch::completed(Some("vec-1".to_string()), None, true));
        item.apply(ItemPatch::failed("later failure", 2));
        assert_eq!(item.unique_id.as_deref(), Some("vec-1"));
        assert_eq!(item.is_preprocessed, Some(true));
    }

    #[test]
    fn test_progress_is_clamped() {
        let mut item = KnowledgeItem::note(Uuid::new_v4());
        item.apply(ItemPatch {
            processing_progress: Some(250),
            ..Default::default()
        });
        assert_eq!(item.processing_progress, Some(100));
    }

    #[test]
    fn test_clear_processing_state_keeps_enrichment() {
        let mut item = KnowledgeItem::note(Uuid::new_v4());
        item.apply(ItemPatch::completed(None, Some(vec!["a".into(), "b".into()]), false));
        item.clear_processing_state();
        assert_eq!(item.processing_status, ProcessingStatus::Completed);
        assert!(item.processing_progress.is_none());
        assert_eq!(item.unique_ids.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_base_params_carry_preprocess_provider() {
        let base = base().with_preprocess_provider(PreprocessProvider {
            id: "mineru".to_string(),
            name: "MinerU".to_string(),
            api_host: None,
        });
        assert!(base.has_preprocess_provider());
        let params = base.params();
        assert_eq!(params.id, base.id);
        assert_eq!(params.embedding.model, "nomic-embed-text");
        assert!(params.preprocess_provider.is_some());
    }

    #[test]
    fn test_item_serializes_with_type_field() {
        let item = KnowledgeItem::new(
            Uuid::new_v4(),
            ItemType::Sitemap,
            ItemContent::Text("https://example.com/sitemap.xml".to_string()),
        );
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "sitemap");
        assert_eq!(json["processingStatus"], "pending");
        assert!(json.get("retryCount").is_none());
    }

    #[test]
    fn test_video_content_deserializes_as_files() {
        let json = r#"[{"id":"f1","name":"talk.mp4","path":"/tmp/talk.mp4","size":42},
                       {"id":"f2","name":"talk.srt","path":"/tmp/talk.srt"}]"#;
        let content: ItemContent = serde_json::from_str(json).unwrap();
        match content {
            ItemContent::Files(files) => {
                assert_eq!(files.len(), 2);
                assert_eq!(files[1].size, 0);
            }
            other => panic!("Expected Files, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_wire_format() {
        let failed: IngestionOutcome = serde_json::from_str(
            r#"{"status":"failed","message":"quota","messageSource":"preprocess"}"#,
        )
        .unwrap();
        assert_eq!(
            failed,
            IngestionOutcome::Failed {
                message: "quota".to_string(),
                source: Some(FailureSource::Preprocess),
            }
        );

        let ok: IngestionOutcome =
            serde_json::from_str(r#"{"status":"success","uniqueId":"abc"}"#).unwrap();
        assert!(ok.is_success());
    }

    #[test]
    fn test_status_terminal() {
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Pending.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
    }
}
