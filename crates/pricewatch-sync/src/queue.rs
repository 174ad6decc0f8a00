//! Durable offline mutation queue.
//!
//! Thin layer over the store's pending-mutation log. Enqueue only
//! touches local storage, so it works with no connectivity at all;
//! ids come from the store and stay stable across restarts.

use tracing::debug;

use pricewatch_core::{Mutation, PendingMutation};
use pricewatch_store::LocalStore;
use pricewatch_telemetry::Metrics;

use crate::error::SyncResult;

/// FIFO queue of mutations awaiting replay.
#[derive(Clone)]
pub struct MutationQueue {
    store: LocalStore,
}

impl MutationQueue {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Append a mutation; returns its store-assigned id.
    pub async fn enqueue(&self, mutation: &Mutation) -> SyncResult<i64> {
        let id = self.store.append_mutation(mutation).await?;
        let depth = self.store.pending_count().await?;
        Metrics::mutation_enqueued(&mutation.kind().to_string());
        Metrics::queue_depth(depth);
        debug!(id, kind = %mutation.kind(), depth, "Mutation enqueued");
        Ok(id)
    }

    /// All queued mutations in enqueue order.
    pub async fn list_pending(&self) -> SyncResult<Vec<PendingMutation>> {
        Ok(self.store.pending_mutations().await?)
    }

    /// Remove a replayed mutation. Returns whether the id was present.
    pub async fn acknowledge(&self, id: i64) -> SyncResult<bool> {
        let removed = self.store.remove_mutation(id).await?;
        let depth = self.store.pending_count().await?;
        Metrics::queue_depth(depth);
        debug!(id, removed, depth, "Mutation acknowledged");
        Ok(removed)
    }

    /// Number of queued mutations.
    pub async fn depth(&self) -> SyncResult<i64> {
        Ok(self.store.pending_count().await?)
    }

    /// Drop everything (manual clear). Returns removed count.
    pub async fn clear(&self) -> SyncResult<u64> {
        let removed = self.store.clear_mutations().await?;
        Metrics::queue_depth(0);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue() -> MutationQueue {
        MutationQueue::new(LocalStore::open_in_memory().await.unwrap())
    }

    fn add(symbol: &str) -> Mutation {
        Mutation::AddWatchlist {
            symbol: symbol.to_string(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_ids() {
        let queue = queue().await;
        let a = queue.enqueue(&add("BTCUSDT")).await.unwrap();
        let b = queue.enqueue(&add("ETHUSDT")).await.unwrap();

        assert!(b > a);
        assert_eq!(queue.depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_acknowledge_removes_only_that_id() {
        let queue = queue().await;
        let a = queue.enqueue(&add("BTCUSDT")).await.unwrap();
        let b = queue.enqueue(&add("ETHUSDT")).await.unwrap();

        assert!(queue.acknowledge(a).await.unwrap());
        assert!(!queue.acknowledge(a).await.unwrap());

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }
}
