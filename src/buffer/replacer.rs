use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::PageId;

/// Pluggable eviction policy over page ids. The buffer pool depends
/// only on this trait, never on a concrete policy.
pub trait Replacer: Send + Sync {
    /// Marks `page_id` eligible for eviction (pin count dropped to 0).
    fn insert(&self, page_id: PageId);

    /// Removes `page_id` from eligibility (pinned, or explicitly protected).
    fn erase(&self, page_id: PageId);

    /// Removes and returns the next eviction victim, if any.
    fn victim(&self) -> Option<PageId>;
}

/// Least-recently-used replacement over `PageId`. Plain LRU rather than
/// LRU-K: the `Replacer` trait here is keyed on page id rather than
/// frame id, so eviction order is simply "oldest insertion first".
pub struct LruReplacer {
    clock: AtomicU64,
    entries: Mutex<HashMap<PageId, u64>>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LruReplacer {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for LruReplacer {
    fn insert(&self, page_id: PageId) {
        let ts = self.clock.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(page_id, ts);
    }

    fn erase(&self, page_id: PageId) {
        self.entries.lock().remove(&page_id);
    }

    fn victim(&self) -> Option<PageId> {
        let mut entries = self.entries.lock();
        let victim = entries
            .iter()
            .min_by_key(|(_, &ts)| ts)
            .map(|(&pid, _)| pid)?;
        entries.remove(&victim);
        Some(victim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let replacer = LruReplacer::new();
        replacer.insert(PageId::new(1));
        replacer.insert(PageId::new(2));
        replacer.insert(PageId::new(3));

        assert_eq!(replacer.victim(), Some(PageId::new(1)));
        assert_eq!(replacer.victim(), Some(PageId::new(2)));
        assert_eq!(replacer.victim(), Some(PageId::new(3)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn erase_removes_eligibility() {
        let replacer = LruReplacer::new();
        replacer.insert(PageId::new(1));
        replacer.insert(PageId::new(2));
        replacer.erase(PageId::new(1));

        assert_eq!(replacer.victim(), Some(PageId::new(2)));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn no_victim_when_empty() {
        let replacer = LruReplacer::new();
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    fn reinsert_after_erase_resets_order() {
        let replacer = LruReplacer::new();
        replacer.insert(PageId::new(1));
        replacer.insert(PageId::new(2));
        replacer.erase(PageId::new(1));
        replacer.insert(PageId::new(1));

        // 1 was re-inserted after 2, so 2 is now the oldest.
        assert_eq!(replacer.victim(), Some(PageId::new(2)));
        assert_eq!(replacer.victim(), Some(PageId::new(1)));
    }
}
