//! Retry policy deciding which items may be (re)processed.

use knowledge_core::{KnowledgeItem, ProcessingStatus};

/// Pure eligibility rules over an item's status and retry count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(knowledge_core::defaults::QUEUE_MAX_RETRIES)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the scheduler may select this item.
    ///
    /// Pending items always are; failed items only while their retry budget
    /// lasts; processing and completed items never.
    pub fn is_eligible(&self, item: &KnowledgeItem) -> bool {
        match item.processing_status {
            ProcessingStatus::Pending => true,
            ProcessingStatus::Failed => self.can_attempt(item),
            ProcessingStatus::Processing | ProcessingStatus::Completed => false,
        }
    }

    /// Processor-side guard: the item still has attempts left.
    pub fn can_attempt(&self, item: &KnowledgeItem) -> bool {
        item.attempts() < self.max_retries
    }

    /// A failed item that will never be selected again.
    pub fn is_dead_letter(&self, item: &KnowledgeItem) -> bool {
        item.processing_status == ProcessingStatus::Failed && !self.can_attempt(item)
    }
}
