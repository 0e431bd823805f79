//! Pending queue: priority-ordered entries plus a cache-key dedup index.
//!
//! Mutated only under the coordinator's state lock; the structure itself is
//! plain collections. Ordering is `(priority desc, admission asc)`; the
//! dedup index maps canonical cache-key strings to the ordered entry so a
//! priority upgrade re-keys in O(log n) without a scan.

use std::collections::{BTreeMap, HashMap};

use super::request::{Priority, QueueKey, SynthesisRequest};

/// Outcome of offering a request to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was novel and is now pending.
    Inserted,
    /// A pending request for the same key had its priority raised.
    Upgraded,
    /// A pending request for the same key already covers this one.
    Duplicate,
}

#[derive(Default)]
pub struct PendingQueue {
    entries: BTreeMap<QueueKey, SynthesisRequest>,
    by_key: HashMap<String, QueueKey>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, cache_key: &str) -> bool {
        self.by_key.contains_key(cache_key)
    }

    /// Offer a request. Deduplicates on the cache key; an equal-key offer
    /// with higher priority upgrades the pending entry in place (its
    /// admission order is preserved so it stays FIFO within the new class).
    pub fn admit(&mut self, req: SynthesisRequest) -> Admission {
        let key_str = req.cache_key.as_str().to_string();

        if let Some(&existing) = self.by_key.get(&key_str) {
            if req.priority > existing.priority {
                let mut pending = self
                    .entries
                    .remove(&existing)
                    .expect("dedup index out of sync with queue");
                pending.priority = req.priority;
                let upgraded = QueueKey {
                    priority: req.priority,
                    seq: existing.seq,
                };
                self.entries.insert(upgraded, pending);
                self.by_key.insert(key_str, upgraded);
                return Admission::Upgraded;
            }
            return Admission::Duplicate;
        }

        let key = QueueKey {
            priority: req.priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.by_key.insert(key_str, key);
        self.entries.insert(key, req);
        Admission::Inserted
    }

    /// The highest-priority, oldest pending request, left in place.
    pub fn peek_first(&self) -> Option<&SynthesisRequest> {
        self.entries.values().next()
    }

    /// Remove and return the highest-priority, oldest pending request,
    /// along with its ordering key (so it can be restored in place).
    pub fn pop_first(&mut self) -> Option<(QueueKey, SynthesisRequest)> {
        let (&key, _) = self.entries.iter().next()?;
        let req = self.entries.remove(&key)?;
        self.by_key.remove(req.cache_key.as_str());
        Some((key, req))
    }

    /// Put a just-popped request back under its original ordering key.
    pub fn restore(&mut self, key: QueueKey, req: SynthesisRequest) {
        self.by_key.insert(req.cache_key.as_str().to_string(), key);
        self.entries.insert(key, req);
    }

    /// Remove and return the overflow victim: the lowest-priority, newest
    /// pending request.
    pub fn drop_victim(&mut self) -> Option<SynthesisRequest> {
        let (&key, _) = self.entries.iter().next_back()?;
        let req = self.entries.remove(&key)?;
        self.by_key.remove(req.cache_key.as_str());
        Some(req)
    }

    /// Drop everything. Returns the number of discarded requests.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.by_key.clear();
        dropped
    }

    /// Priority of the pending entry for `cache_key`, if any.
    pub fn priority_of(&self, cache_key: &str) -> Option<Priority> {
        self.by_key.get(cache_key).map(|k| k.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::request::CacheKey;
    use std::time::Instant;

    fn request(text: &str, priority: Priority) -> SynthesisRequest {
        SynthesisRequest {
            track: text.to_string(),
            voice_id: "kokoro_af".to_string(),
            effective_rate: 1.0,
            segment_index: 0,
            priority,
            cache_key: CacheKey::compute("kokoro_af", text, 1.0),
            book_id: "book".to_string(),
            chapter_index: 0,
            created_at: Instant::now(),
        }
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let mut queue = PendingQueue::new();
        queue.admit(request("a", Priority::Prefetch));
        queue.admit(request("b", Priority::Background));
        queue.admit(request("c", Priority::Immediate));
        queue.admit(request("d", Priority::Prefetch));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop_first())
            .map(|(_, r)| r.track)
            .collect();
        assert_eq!(order, vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn duplicate_key_is_not_enqueued_twice() {
        let mut queue = PendingQueue::new();
        assert_eq!(queue.admit(request("a", Priority::Prefetch)), Admission::Inserted);
        assert_eq!(queue.admit(request("a", Priority::Prefetch)), Admission::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn upgrade_raises_priority_but_never_lowers() {
        let mut queue = PendingQueue::new();
        queue.admit(request("a", Priority::Prefetch));
        assert_eq!(
            queue.admit(request("a", Priority::Immediate)),
            Admission::Upgraded
        );
        assert_eq!(queue.priority_of(request("a", Priority::Prefetch).cache_key.as_str()),
            Some(Priority::Immediate));

        // A later lower-priority offer is a plain duplicate.
        assert_eq!(
            queue.admit(request("a", Priority::Background)),
            Admission::Duplicate
        );
        assert_eq!(queue.len(), 1);

        let (_, popped) = queue.pop_first().unwrap();
        assert_eq!(popped.priority, Priority::Immediate);
    }

    #[test]
    fn upgraded_entry_keeps_admission_order_within_new_class() {
        let mut queue = PendingQueue::new();
        queue.admit(request("early", Priority::Prefetch));
        queue.admit(request("later-immediate", Priority::Immediate));
        queue.admit(request("early", Priority::Immediate));

        // "early" was admitted first, so after its upgrade it dispatches
        // ahead of the Immediate request that arrived after it.
        assert_eq!(queue.pop_first().unwrap().1.track, "early");
        assert_eq!(queue.pop_first().unwrap().1.track, "later-immediate");
    }

    #[test]
    fn restore_puts_a_popped_request_back_in_place() {
        let mut queue = PendingQueue::new();
        queue.admit(request("first", Priority::Prefetch));
        queue.admit(request("second", Priority::Prefetch));

        let (key, req) = queue.pop_first().unwrap();
        assert_eq!(req.track, "first");
        queue.restore(key, req);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_first().unwrap().track, "first");
    }

    #[test]
    fn victim_is_lowest_priority_newest() {
        let mut queue = PendingQueue::new();
        queue.admit(request("hi", Priority::Immediate));
        queue.admit(request("old-bg", Priority::Background));
        queue.admit(request("new-bg", Priority::Background));

        let victim = queue.drop_victim().unwrap();
        assert_eq!(victim.track, "new-bg");
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains(victim.cache_key.as_str()));
    }

    #[test]
    fn clear_reports_dropped_count() {
        let mut queue = PendingQueue::new();
        queue.admit(request("a", Priority::Prefetch));
        queue.admit(request("b", Priority::Prefetch));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.pop_first().is_none());
    }
}
