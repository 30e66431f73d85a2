//! Terminated-Workload Aggregator (component H).
//!
//! Exporters report counters; a workload that disappears between scrapes
//! would otherwise make its series reset, violating the counter contract.
//! A terminated entity's last cumulative total is retained here for a
//! bounded retention window, then evicted.

use std::collections::HashMap;
use std::hash::Hash;

/// LRU-by-last-seen map of terminated entities, bounded both by retention
/// window (in ticks) and by a hard capacity to bound memory on hostile
/// workloads that churn identities.
pub struct TerminatedSet<K: Eq + Hash + Clone, V> {
    entries: HashMap<K, (V, u64)>,
    retention_ticks: u64,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> TerminatedSet<K, V> {
    pub fn new(retention_ticks: u64, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            retention_ticks: retention_ticks.max(1),
            capacity,
        }
    }

    /// Record (or refresh) an entity as terminated as of `tick`.
    pub fn insert(&mut self, key: K, value: V, tick: u64) {
        self.entries.insert(key, (value, tick));
        self.evict_over_capacity();
    }

    /// Advance the retention window: drop entries last seen more than
    /// `retention_ticks` ago. Called once per tick by the tick task.
    pub fn advance(&mut self, current_tick: u64) {
        self.entries
            .retain(|_, (_, last_seen)| current_tick.saturating_sub(*last_seen) < self.retention_ticks);
    }

    fn evict_over_capacity(&mut self) {
        if self.entries.len() <= self.capacity {
            return;
        }
        // Evict the least-recently-seen entries until back under capacity.
        let mut by_age: Vec<(K, u64)> = self
            .entries
            .iter()
            .map(|(k, (_, t))| (k.clone(), *t))
            .collect();
        by_age.sort_by_key(|(_, t)| *t);
        let overflow = self.entries.len() - self.capacity;
        for (key, _) in by_age.into_iter().take(overflow) {
            self.entries.remove(&key);
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, (v, _))| (k, v))
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_present_immediately_after_insert_s3() {
        let mut set: TerminatedSet<String, u64> = TerminatedSet::new(2, 100);
        set.insert("p1".to_string(), 100, 0);
        assert!(set.contains(&"p1".to_string()));
    }

    #[test]
    fn entry_evicted_after_retention_window_elapses_s3() {
        let mut set: TerminatedSet<String, u64> = TerminatedSet::new(2, 100);
        set.insert("p1".to_string(), 100, 0);
        set.advance(1);
        assert!(set.contains(&"p1".to_string()), "still within window");
        set.advance(2);
        assert!(!set.contains(&"p1".to_string()), "window elapsed");
    }

    #[test]
    fn over_capacity_evicts_oldest_first() {
        let mut set: TerminatedSet<u32, u64> = TerminatedSet::new(100, 2);
        set.insert(1, 10, 0);
        set.insert(2, 20, 1);
        set.insert(3, 30, 2);
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&1));
        assert!(set.contains(&2));
        assert!(set.contains(&3));
    }
}
