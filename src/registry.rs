//! In-memory registry of live and recently finished runs.
//!
//! Each run gets a cancellation token at registration; cancelling through
//! the registry is cooperative, the run observes the token between steps.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use webpilot_core_types::{ExecutionRun, RunId};

#[derive(Clone)]
pub struct RunHandle {
    pub run: Arc<RwLock<ExecutionRun>>,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct RunRegistry {
    runs: DashMap<RunId, RunHandle>,
}

impl RunRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a freshly queued run and hand back its shared handle.
    pub fn register(&self, run: ExecutionRun) -> RunHandle {
        let id = run.id.clone();
        let handle = RunHandle {
            run: Arc::new(RwLock::new(run)),
            cancel: CancellationToken::new(),
        };
        self.runs.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: &RunId) -> Option<RunHandle> {
        self.runs.get(id).map(|entry| entry.value().clone())
    }

    /// Request cooperative cancellation. Returns false for unknown runs.
    pub fn cancel(&self, id: &RunId) -> bool {
        match self.runs.get(id) {
            Some(entry) => {
                info!(run = %id, "cancellation requested");
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Point-in-time copy of a run record, for reporting.
    pub fn snapshot(&self, id: &RunId) -> Option<ExecutionRun> {
        self.runs.get(id).map(|entry| entry.run.read().clone())
    }

    pub fn remove(&self, id: &RunId) -> Option<RunHandle> {
        self.runs.remove(id).map(|(_, handle)| handle)
    }

    pub fn list(&self) -> Vec<RunId> {
        self.runs.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
