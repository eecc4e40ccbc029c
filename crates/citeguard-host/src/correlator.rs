//! Links a pre-flight call to its post-flight call by content fingerprint.
//!
//! Each store creates one ticket holding the verified set and pushes it onto
//! the FIFO queue of every fingerprint it was stored under. Resolving pops the
//! front ticket of the first candidate key that has one and removes that
//! ticket from its other keys, so the Nth store for identical content pairs
//! with the Nth resolve. A resolved ticket is gone from every key; there is
//! no separate clear step.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use citeguard_core::SectionRecord;
use parking_lot::Mutex;
use tracing::debug;

/// Records verified for one request, shared by every key it is stored under.
pub type VerifiedSet = Arc<Vec<SectionRecord>>;

struct Ticket {
    keys: Vec<String>,
    set: VerifiedSet,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<u64>>,
    /// Live tickets by id; ids only grow, so the first entry is the oldest.
    tickets: BTreeMap<u64, Ticket>,
    next_id: u64,
}

impl Inner {
    fn detach(&mut self, id: u64) -> Option<Ticket> {
        let ticket = self.tickets.remove(&id)?;
        for key in &ticket.keys {
            if let Some(queue) = self.queues.get_mut(key) {
                queue.retain(|&t| t != id);
                if queue.is_empty() {
                    self.queues.remove(key);
                }
            }
        }
        Some(ticket)
    }
}

pub struct RequestCorrelator {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl RequestCorrelator {
    /// `capacity` bounds the number of live tickets; the oldest are dropped first.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Store `set` under every given fingerprint as a single ticket.
    pub fn store(&self, fingerprints: &[String], set: VerifiedSet) {
        let mut keys: Vec<String> = Vec::with_capacity(fingerprints.len());
        for fp in fingerprints {
            if !keys.contains(fp) {
                keys.push(fp.clone());
            }
        }
        if keys.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        for key in &keys {
            inner.queues.entry(key.clone()).or_default().push_back(id);
        }
        inner.tickets.insert(id, Ticket { keys, set });

        while inner.tickets.len() > self.capacity {
            let Some(oldest) = inner.tickets.keys().next().copied() else {
                break;
            };
            inner.detach(oldest);
            debug!(ticket = oldest, "correlator full, dropped oldest pending request");
        }
    }

    /// Pop the verified set for the first candidate key that has one.
    pub fn resolve(&self, candidates: &[String]) -> Option<VerifiedSet> {
        let mut inner = self.inner.lock();
        for (rank, key) in candidates.iter().enumerate() {
            let Some(id) = inner.queues.get(key).and_then(|q| q.front().copied()) else {
                continue;
            };
            if let Some(ticket) = inner.detach(id) {
                debug!(
                    key = &key[..key.len().min(8)],
                    rank,
                    sections = ticket.set.len(),
                    "resolved verified set"
                );
                return Some(ticket.set);
            }
        }
        None
    }

    /// Number of pending tickets.
    pub fn len(&self) -> usize {
        self.inner.lock().tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use citeguard_core::{CodeId, Hierarchy};

    fn set(section: &str) -> VerifiedSet {
        Arc::new(vec![SectionRecord {
            code: CodeId::Pen,
            section: section.into(),
            code_name: "Penal".into(),
            body: String::new(),
            legislative_history: None,
            source_url: String::new(),
            hierarchy: Hierarchy::default(),
            retrieved_at: Utc::now(),
            is_multi_version: false,
            versions: vec![],
            updated_at: None,
        }])
    }

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    fn section_of(set: &VerifiedSet) -> &str {
        &set[0].section
    }

    #[test]
    fn resolve_consumes_ticket_under_every_key() {
        let c = RequestCorrelator::new(10);
        c.store(&keys(&["enriched", "original"]), set("187"));
        assert_eq!(c.len(), 1);

        let got = c.resolve(&keys(&["original"])).unwrap();
        assert_eq!(section_of(&got), "187");
        assert!(c.resolve(&keys(&["enriched"])).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn candidates_tried_in_order() {
        let c = RequestCorrelator::new(10);
        c.store(&keys(&["a"]), set("1"));
        c.store(&keys(&["b"]), set("2"));
        let got = c.resolve(&keys(&["missing", "b", "a"])).unwrap();
        assert_eq!(section_of(&got), "2");
    }

    #[test]
    fn identical_content_pairs_in_arrival_order() {
        let c = RequestCorrelator::new(10);
        c.store(&keys(&["same", "same-enriched"]), set("first"));
        c.store(&keys(&["same", "same-enriched"]), set("second"));

        assert_eq!(section_of(&c.resolve(&keys(&["same-enriched"])).unwrap()), "first");
        assert_eq!(section_of(&c.resolve(&keys(&["same"])).unwrap()), "second");
        assert!(c.resolve(&keys(&["same"])).is_none());
    }

    #[test]
    fn duplicate_fingerprints_collapse() {
        let c = RequestCorrelator::new(10);
        c.store(&keys(&["k", "k"]), set("1"));
        assert!(c.resolve(&keys(&["k"])).is_some());
        assert!(c.resolve(&keys(&["k"])).is_none());
    }

    #[test]
    fn capacity_evicts_oldest() {
        let c = RequestCorrelator::new(2);
        c.store(&keys(&["a"]), set("1"));
        c.store(&keys(&["b"]), set("2"));
        c.store(&keys(&["c"]), set("3"));
        assert_eq!(c.len(), 2);
        assert!(c.resolve(&keys(&["a"])).is_none());
        assert!(c.resolve(&keys(&["b"])).is_some());
        assert!(c.resolve(&keys(&["c"])).is_some());
    }

    #[test]
    fn resolving_clears_ticket_from_every_key() {
        let c = RequestCorrelator::new(10);
        c.store(&keys(&["a", "b", "c"]), set("1"));
        assert!(c.resolve(&keys(&["a"])).is_some());
        assert!(c.resolve(&keys(&["b"])).is_none());
        assert!(c.resolve(&keys(&["c"])).is_none());
        assert!(c.is_empty());
    }

    #[test]
    fn concurrent_identical_requests_each_get_one_set() {
        let c = Arc::new(RequestCorrelator::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        c.store(&keys(&["hot", "hot-enriched"]), set(&format!("{t}-{i}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 400);

        let resolvers: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    for _ in 0..50 {
                        let set = c.resolve(&keys(&["hot-enriched", "hot"])).unwrap();
                        got.push(set[0].section.clone());
                    }
                    got
                })
            })
            .collect();
        let mut all: Vec<String> = resolvers
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 400);
        assert!(c.is_empty());
    }
}
