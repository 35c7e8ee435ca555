//! Explicit read cache of materialized run trees.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use fragbench_core::RunId;

use crate::types::RunTree;

/// Run id → materialized tree.
///
/// Entries are filled lazily by reads and dropped by any write to the run.
/// A read that races with an in-flight write may still cache a tree that
/// misses the write's artifact; the next write to that run clears it.
#[derive(Debug, Default)]
pub struct RunCache {
    entries: RwLock<HashMap<RunId, Arc<RunTree>>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, run: &RunId) -> Option<Arc<RunTree>> {
        self.entries.read().await.get(run).cloned()
    }

    pub async fn insert(&self, tree: Arc<RunTree>) {
        self.entries.write().await.insert(tree.run.clone(), tree);
    }

    pub async fn invalidate(&self, run: &RunId) {
        if self.entries.write().await.remove(run).is_some() {
            debug!(run = %run, "run cache entry invalidated");
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
