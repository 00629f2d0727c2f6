//! # knowledge-core
//!
//! Core types, traits, and abstractions for the knowledge-base ingestion queue.
//!
//! This crate provides the data model (bases, items, processing status), the
//! collaborator traits the scheduler is written against (item store, note
//! store, ingestion backend, notification sink), and the shared error type.

pub mod defaults;
pub mod error;
pub mod models;
pub mod notification;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use notification::{
    BroadcastNotificationSink, MessageKey, Notification, NotificationKind, NotificationSource,
};
pub use traits::*;
