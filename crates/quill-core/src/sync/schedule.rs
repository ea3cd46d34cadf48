//! Batch selection over a queue snapshot.
//!
//! The snapshot is kept as a flat arena in FIFO order; a per-entity index of
//! arena positions gives each entity's ordered list of operations. One
//! snapshot serves a whole drain cycle: acknowledged items are resolved out
//! of it, and items queued after it was taken wait for the next cycle.

use std::collections::{HashMap, HashSet};

use super::config::RetryPolicy;
use crate::models::{EntityKey, QueueItem};

/// Per-entity view of a queue snapshot.
#[derive(Debug, Clone, Default)]
pub struct PendingIndex {
    items: Vec<QueueItem>,
    by_entity: HashMap<EntityKey, Vec<usize>>,
}

impl PendingIndex {
    /// Index a snapshot; items are ordered by `created_at`, then `id`.
    pub fn new(mut items: Vec<QueueItem>) -> Self {
        items.sort_by_key(|item| (item.created_at, item.id));

        let mut by_entity: HashMap<EntityKey, Vec<usize>> = HashMap::new();
        for (position, item) in items.iter().enumerate() {
            by_entity.entry(item.key()).or_default().push(position);
        }

        Self { items, by_entity }
    }

    /// Number of unresolved items, abandoned ones included.
    pub fn len(&self) -> usize {
        self.by_entity.values().map(Vec::len).sum()
    }

    /// True when nothing is left unresolved.
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// Unresolved items that may still be delivered.
    pub fn eligible_count(&self, policy: RetryPolicy) -> usize {
        self.by_entity
            .values()
            .flatten()
            .filter(|&&position| policy.is_eligible(self.items[position].attempts))
            .count()
    }

    /// Drop an acknowledged item so its entity's next operation becomes head.
    ///
    /// Returns false if the item is not in the snapshot or already resolved.
    pub fn resolve(&mut self, id: i64) -> bool {
        let Some(position) = self.items.iter().position(|item| item.id == id) else {
            return false;
        };
        let key = self.items[position].key();
        let Some(positions) = self.by_entity.get_mut(&key) else {
            return false;
        };
        let before = positions.len();
        positions.retain(|&p| p != position);
        let resolved = positions.len() < before;
        if positions.is_empty() {
            self.by_entity.remove(&key);
        }
        resolved
    }

    /// The first deliverable operation of one entity.
    ///
    /// Abandoned operations ahead of it no longer block it.
    pub fn head(&self, key: EntityKey, policy: RetryPolicy) -> Option<&QueueItem> {
        self.by_entity
            .get(&key)?
            .iter()
            .map(|&position| &self.items[position])
            .find(|item| policy.is_eligible(item.attempts))
    }

    /// Select the next batch: at most one operation per entity, each the head
    /// of its entity's list, in global FIFO order, capped at `limit`.
    pub fn next_batch(
        &self,
        policy: RetryPolicy,
        exclude: &HashSet<EntityKey>,
        limit: usize,
    ) -> Vec<QueueItem> {
        let mut heads: Vec<usize> = self
            .by_entity
            .iter()
            .filter(|(key, _)| !exclude.contains(key))
            .filter_map(|(_, positions)| {
                positions
                    .iter()
                    .copied()
                    .find(|&position| policy.is_eligible(self.items[position].attempts))
            })
            .collect();

        heads.sort_unstable();
        heads
            .into_iter()
            .take(limit)
            .map(|position| self.items[position].clone())
            .collect()
    }
}
