//! # knowledge-queue
//!
//! Ingestion scheduler for knowledge-base items.
//!
//! This crate provides:
//! - A retry policy deciding which items may be (re)processed
//! - A per-base active-run registry guaranteeing one scheduler loop per base
//! - An item processor driving one item through `processing → completed | failed`
//! - A queue manager that fans out over all bases and spawns item attempts
//! - In-memory stores and a mock backend for embedding and tests
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use knowledge_queue::{QueueConfig, QueueManager};
//! use knowledge_queue::memory::{MemoryItemStore, MemoryNoteStore};
//!
//! let manager = QueueManager::builder(Arc::new(store), Arc::new(backend))
//!     .with_note_store(Arc::new(notes))
//!     .with_config(QueueConfig::from_env())
//!     .build();
//!
//! // One-off sweep
//! manager.check_all_bases().await;
//!
//! // Or poll in the background
//! let handle = manager.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! handle.shutdown().await?;
//! ```

pub mod config;
pub mod events;
pub mod manager;
pub mod memory;
pub mod mock;
pub mod processor;
pub mod retry;
pub mod runs;

// Re-export core types
pub use knowledge_core::*;

pub use config::QueueConfig;
pub use events::QueueEvent;
pub use manager::{QueueHandle, QueueManager, QueueManagerBuilder};
pub use processor::{Attempt, ItemProcessor};
pub use retry::RetryPolicy;
pub use runs::{ActiveRuns, RunGuard};

/// Default attempts per item before it is dead-lettered.
pub const MAX_RETRIES: u32 = knowledge_core::defaults::QUEUE_MAX_RETRIES;
