use crate::path::Path;
use crate::problem::GraphItem;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// A scored search node. Its path carries the parent chain and the cumulative cost.
#[derive(Debug, Clone, PartialEq)]
pub struct Node<S, A> {
    pub path: Path<S, A>,
    pub score: f64,
    pub goal: bool,
}

impl<S, A> Node<S, A> {
    pub fn state(&self) -> &S {
        self.path.head()
    }
}

struct Entry<S, A> {
    score: f64,
    seq: u64,
    node: Node<S, A>,
}

impl<S, A> PartialEq for Entry<S, A> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<S, A> Eq for Entry<S, A> {}

impl<S, A> PartialOrd for Entry<S, A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed, so that the max-heap yields the lowest score and, among equal scores, the oldest entry.
impl<S, A> Ord for Entry<S, A> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// The frontier, ordered by score with FIFO tie-breaking.
///
/// When built `indexed`, it keeps at most one node per state: see [`Open::offer`]. Replaced
/// nodes stay in the heap as stale entries until they surface.
pub struct Open<S, A> {
    heap: BinaryHeap<Entry<S, A>>,
    index: Option<HashMap<S, (u64, f64)>>,
    next_seq: u64,
    live: usize,
}

impl<S: GraphItem, A: GraphItem> Open<S, A> {
    pub fn new(indexed: bool) -> Self {
        Open {
            heap: BinaryHeap::new(),
            index: if indexed { Some(HashMap::new()) } else { None },
            next_seq: 0,
            live: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Inserts unconditionally and returns the sequence number.
    pub fn insert(&mut self, node: Node<S, A>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(index) = &mut self.index {
            if index.insert(node.state().clone(), (seq, node.score)).is_none() {
                self.live += 1;
            }
        } else {
            self.live += 1;
        }
        self.heap.push(Entry {
            score: node.score,
            seq,
            node,
        });
        self.drop_stale();
        seq
    }

    /// Inserts unless an equal or better node for the same state is already present; a
    /// worse one is replaced. Without an index this is [`Open::insert`].
    pub fn offer(&mut self, node: Node<S, A>) -> bool {
        if let Some((_, score)) = self.index.as_ref().and_then(|i| i.get(node.state())) {
            if *score <= node.score {
                return false;
            }
        }
        self.insert(node);
        true
    }

    pub fn contains(&self, state: &S) -> bool {
        match &self.index {
            Some(index) => index.contains_key(state),
            None => self.heap.iter().any(|e| e.node.state() == state),
        }
    }

    pub fn peek_score(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.score)
    }

    pub fn pop(&mut self) -> Option<Node<S, A>> {
        let entry = self.heap.pop()?;
        if let Some(index) = &mut self.index {
            index.remove(entry.node.state());
        }
        self.live -= 1;
        self.drop_stale();
        Some(entry.node)
    }

    /// Pops up to `n` nodes, best first.
    pub fn take(&mut self, n: usize) -> Vec<Node<S, A>> {
        let mut v = Vec::with_capacity(n.min(self.live));
        while v.len() < n {
            match self.pop() {
                Some(node) => v.push(node),
                None => break,
            }
        }
        v
    }

    /// The live nodes in the order they would be popped.
    pub fn snapshot(&self) -> Vec<Node<S, A>> {
        let mut entries: Vec<&Entry<S, A>> = self.heap.iter().filter(|e| self.is_live(e)).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| e.node.clone()).collect()
    }

    pub fn drain(&mut self) -> Vec<Node<S, A>> {
        self.take(self.live)
    }

    fn is_live(&self, e: &Entry<S, A>) -> bool {
        match &self.index {
            Some(index) => index.get(e.node.state()).map_or(false, |(seq, _)| *seq == e.seq),
            None => true,
        }
    }

    // Keeps the top of the heap live so that peeking needs no mutation.
    fn drop_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_live(top) {
                break;
            }
            self.heap.pop();
        }
    }
}
