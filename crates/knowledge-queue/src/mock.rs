//! Mock ingestion backend for deterministic testing.
//!
//! Responses are scripted per item; an item with no script left succeeds with
//! a unique id derived from its own id. Every request is logged.
//!
//! ```rust
//! use knowledge_queue::mock::{MockIngestionBackend, MockResponse};
//!
//! let backend = MockIngestionBackend::new();
//! let item_id = uuid::Uuid::new_v4();
//! backend.push_response(item_id, MockResponse::Error("unreachable".to_string()));
//! assert_eq!(backend.call_count(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use knowledge_core::{
    Error, IngestionBackend, IngestionContext, IngestionOutcome, IngestionRequest, Result,
};

/// Scripted reply for one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Return this outcome.
    Outcome(IngestionOutcome),
    /// Return `Err(Error::Ingestion(..))`.
    Error(String),
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<Uuid, VecDeque<MockResponse>>,
    holds: HashMap<Uuid, Arc<Notify>>,
    calls: Vec<IngestionRequest>,
}

/// Mock ingestion backend. Clones share scripts and the call log.
#[derive(Clone, Default)]
pub struct MockIngestionBackend {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
}

impl MockIngestionBackend {
    /// Create a new mock backend where every call succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by this much.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply for the next call for this item.
    pub fn push_response(&self, item_id: Uuid, response: MockResponse) {
        self.lock()
            .scripts
            .entry(item_id)
            .or_default()
            .push_back(response);
    }

    /// Queue several replies for this item, in order.
    pub fn with_responses(self, item_id: Uuid, responses: Vec<MockResponse>) -> Self {
        for response in responses {
            self.push_response(item_id, response);
        }
        self
    }

    /// Make calls for this item wait until the returned gate is notified.
    pub fn hold(&self, item_id: Uuid) -> Arc<Notify> {
        self.lock()
            .holds
            .entry(item_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<IngestionRequest> {
        self.lock().calls.clone()
    }

    /// Requests received for one item.
    pub fn calls_for(&self, item_id: Uuid) -> Vec<IngestionRequest> {
        self.lock()
            .calls
            .iter()
            .filter(|r| r.item.id == item_id)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }
}

#[async_trait]
impl IngestionBackend for MockIngestionBackend {
    async fn add(&self, ctx: IngestionContext) -> Result<IngestionOutcome> {
        let item_id = ctx.request.item.id;
        let (response, hold) = {
            let mut state = self.lock();
            state.calls.push(ctx.request.clone());
            let response = state
                .scripts
                .get_mut(&item_id)
                .and_then(VecDeque::pop_front);
            (response, state.holds.get(&item_id).cloned())
        };

        if let Some(gate) = hold {
            gate.notified().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match response {
            Some(MockResponse::Outcome(outcome)) => {
                if outcome.is_success() {
                    ctx.report_progress(50);
                    ctx.report_progress(100);
                }
                Ok(outcome)
            }
            Some(MockResponse::Error(message)) => Err(Error::Ingestion(message)),
            None => {
                ctx.report_progress(50);
                ctx.report_progress(100);
                Ok(IngestionOutcome::Success {
                    unique_id: Some(format!("emb-{}", item_id)),
                    unique_ids: None,
                })
            }
        }
    }
}
