//! In-process item and note stores.
//!
//! Backed by `tokio::sync::RwLock`ed collections. Used by the simulation
//! binary and tests, and usable as-is by embedders that keep their knowledge
//! bases in memory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use knowledge_core::{
    Error, ItemPatch, ItemStore, KnowledgeBase, KnowledgeItem, NoteContent, NoteStore,
    ProcessingStatus, Result,
};

/// In-memory [`ItemStore`]. Clones share the same bases.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    bases: Arc<RwLock<Vec<KnowledgeBase>>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing bases.
    pub fn with_bases(bases: Vec<KnowledgeBase>) -> Self {
        Self {
            bases: Arc::new(RwLock::new(bases)),
        }
    }

    /// Add or replace a base.
    pub async fn insert_base(&self, base: KnowledgeBase) {
        let mut bases = self.bases.write().await;
        match bases.iter_mut().find(|b| b.id == base.id) {
            Some(existing) => *existing = base,
            None => bases.push(base),
        }
    }

    /// Append an item to a base. Item ids are unique within a base.
    pub async fn add_item(&self, base_id: Uuid, mut item: KnowledgeItem) -> Result<()> {
        let mut bases = self.bases.write().await;
        let base = bases
            .iter_mut()
            .find(|b| b.id == base_id)
            .ok_or(Error::BaseNotFound(base_id))?;
        if base.item(item.id).is_some() {
            return Err(Error::Store(format!(
                "Item {} already exists in base {}",
                item.id, base_id
            )));
        }
        item.base_id = base_id;
        base.items.push(item);
        Ok(())
    }

    /// Remove an item. Returns whether it existed.
    pub async fn remove_item(&self, base_id: Uuid, item_id: Uuid) -> bool {
        let mut bases = self.bases.write().await;
        let Some(base) = bases.iter_mut().find(|b| b.id == base_id) else {
            return false;
        };
        let before = base.items.len();
        base.items.retain(|i| i.id != item_id);
        base.items.len() != before
    }

    /// Snapshot of one item.
    pub async fn item(&self, base_id: Uuid, item_id: Uuid) -> Option<KnowledgeItem> {
        let bases = self.bases.read().await;
        bases
            .iter()
            .find(|b| b.id == base_id)
            .and_then(|b| b.item(item_id).cloned())
    }

    /// Snapshot of every base.
    pub async fn snapshot(&self) -> Vec<KnowledgeBase> {
        self.bases.read().await.clone()
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn list_bases(&self) -> Result<Vec<KnowledgeBase>> {
        Ok(self.snapshot().await)
    }

    async fn get_base(&self, base_id: Uuid) -> Result<Option<KnowledgeBase>> {
        let bases = self.bases.read().await;
        Ok(bases.iter().find(|b| b.id == base_id).cloned())
    }

    async fn patch_item(&self, base_id: Uuid, item_id: Uuid, patch: ItemPatch) -> Result<()> {
        let mut bases = self.bases.write().await;
        let base = bases
            .iter_mut()
            .find(|b| b.id == base_id)
            .ok_or(Error::BaseNotFound(base_id))?;
        let item = base
            .item_mut(item_id)
            .ok_or(Error::ItemNotFound { base_id, item_id })?;
        item.apply(patch);
        Ok(())
    }

    async fn clear_completed(&self, base_id: Uuid) -> Result<()> {
        let mut bases = self.bases.write().await;
        let base = bases
            .iter_mut()
            .find(|b| b.id == base_id)
            .ok_or(Error::BaseNotFound(base_id))?;
        let mut cleared = 0usize;
        for item in base
            .items
            .iter_mut()
            .filter(|i| i.processing_status == ProcessingStatus::Completed)
        {
            item.clear_processing_state();
            cleared += 1;
        }
        debug!(%base_id, cleared, "Cleared completed processing state");
        Ok(())
    }
}

/// In-memory [`NoteStore`]. Clones share the same notes.
#[derive(Clone, Default)]
pub struct MemoryNoteStore {
    notes: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with note bodies.
    pub fn with_notes(notes: HashMap<Uuid, String>) -> Self {
        Self {
            notes: Arc::new(RwLock::new(notes)),
        }
    }

    /// Insert or replace a note body.
    pub async fn put(&self, note_id: Uuid, content: impl Into<String>) {
        self.notes.write().await.insert(note_id, content.into());
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn get(&self, note_id: Uuid) -> Result<Option<NoteContent>> {
        let notes = self.notes.read().await;
        Ok(notes.get(&note_id).map(|content| NoteContent {
            content: content.clone(),
        }))
    }
}
