//! Bounded, recency-ordered batch buffer keyed by transaction hash

use andamio_common::{TransactionContext, TransactionEvent, TxHash};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

pub type Entry = (TransactionEvent, TransactionContext);

struct Node {
    key: TxHash,
    entry: Entry,
    prev: Option<usize>,
    next: Option<usize>,
}

// Doubly-linked recency list over an index arena; `head` is least recent
#[derive(Default)]
struct Lru {
    index: HashMap<TxHash, usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Lru {
    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.nodes.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let Some((prev, next)) = self.node_mut(slot).map(|n| (n.prev.take(), n.next.take())) else {
            return;
        };
        match prev.and_then(|p| self.node_mut(p)) {
            Some(prev_node) => prev_node.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.node_mut(n)) {
            Some(next_node) => next_node.prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.node_mut(slot) {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail.and_then(|t| self.node_mut(t)) {
            Some(tail_node) => tail_node.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn insert(&mut self, key: TxHash, entry: Entry) {
        if let Some(&slot) = self.index.get(&key) {
            if let Some(node) = self.node_mut(slot) {
                node.entry = entry;
            }
            self.unlink(slot);
            self.push_back(slot);
            return;
        }

        let node = Node {
            key,
            entry,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_back(slot);
    }

    fn pop_front(&mut self) -> Option<Node> {
        let slot = self.head?;
        self.unlink(slot);
        let node = self.nodes.get_mut(slot)?.take()?;
        self.index.remove(&node.key);
        self.free.push(slot);
        Some(node)
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

/// Coalesces admitted transactions by hash, evicting the least recent one
/// once more than `limit` are held.
pub struct BatchBuffer {
    limit: usize,
    lru: Mutex<Lru>,
}

impl BatchBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            lru: Mutex::new(Lru::default()),
        }
    }

    /// Insert or refresh an entry as most recent. Returns the hash of the
    /// entry evicted to stay within the limit, if any.
    pub fn add(&self, event: TransactionEvent, context: TransactionContext) -> Option<TxHash> {
        let mut lru = self.lru.lock().unwrap_or_else(PoisonError::into_inner);
        lru.insert(event.tx_hash, (event, context));
        if lru.len() > self.limit {
            return lru.pop_front().map(|node| node.key);
        }
        None
    }

    /// Take every entry, least recent first
    pub fn drain(&self) -> Vec<Entry> {
        let mut lru = self.lru.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = Vec::with_capacity(lru.len());
        while let Some(node) = lru.pop_front() {
            entries.push(node.entry);
        }
        *lru = Lru::default();
        entries
    }

    pub fn len(&self) -> usize {
        self.lru.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
