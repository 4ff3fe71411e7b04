//! Node pool and priority queue for graph searches
//!
//! Nodes live in a fixed arena and are addressed by `NodeIndex`; the queue
//! stores indices and orders them by the node's total cost.

use glam::Vec3;
use recast_common::{hash_ref, next_pow2};

use crate::PolyRef;

/// Index of a node in its pool
pub type NodeIndex = u16;

/// Maximum number of states stored per polygon
pub const DT_MAX_STATES_PER_NODE: usize = 4;

/// Largest pool a `NodeIndex` can address
const MAX_POOL_NODES: usize = NodeIndex::MAX as usize;

bitflags::bitflags! {
    /// Search state of a node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
        /// Parent is not adjacent; found by a raycast shortcut
        const PARENT_DETACHED = 0x04;
    }
}

/// Search node for one polygon state
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Position the node is entered at
    pub pos: Vec3,
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    pub parent: Option<NodeIndex>,
    pub state: u8,
    pub flags: NodeFlags,
    pub id: PolyRef,
}

/// Fixed capacity arena of search nodes hashed by polygon reference
#[derive(Debug, Clone)]
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<Option<NodeIndex>>,
    next: Vec<Option<NodeIndex>>,
    max_nodes: usize,
}

impl NodePool {
    /// Creates a pool of at most `max_nodes` nodes
    pub fn new(max_nodes: usize) -> Self {
        let max_nodes = max_nodes.clamp(1, MAX_POOL_NODES);
        let hash_size = next_pow2((max_nodes / 4).max(1) as u32) as usize;
        Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![None; hash_size],
            next: vec![None; max_nodes],
            max_nodes,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.first.fill(None);
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    fn bucket(&self, id: PolyRef) -> usize {
        hash_ref(id.id()) as usize & (self.first.len() - 1)
    }

    /// Returns the node for `(id, state)`, allocating it on first use.
    /// `None` once the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        if let Some(i) = self.find_node(id, state) {
            return Some(i);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len() as NodeIndex;
        self.nodes.push(Node {
            id,
            state,
            ..Node::default()
        });
        let bucket = self.bucket(id);
        self.next[idx as usize] = self.first[bucket];
        self.first[bucket] = Some(idx);
        Some(idx)
    }

    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<NodeIndex> {
        let mut cur = self.first[self.bucket(id)];
        while let Some(i) = cur {
            let node = &self.nodes[i as usize];
            if node.id == id && node.state == state {
                return Some(i);
            }
            cur = self.next[i as usize];
        }
        None
    }

    /// Every node allocated for `id`, whatever its state
    pub fn find_nodes(&self, id: PolyRef) -> Vec<NodeIndex> {
        let mut out = Vec::with_capacity(DT_MAX_STATES_PER_NODE);
        let mut cur = self.first[self.bucket(id)];
        while let Some(i) = cur {
            if self.nodes[i as usize].id == id && out.len() < DT_MAX_STATES_PER_NODE {
                out.push(i);
            }
            cur = self.next[i as usize];
        }
        out
    }

    #[inline]
    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx as usize]
    }

    #[inline]
    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx as usize]
    }
}

/// Binary min-heap of node indices keyed on `Node::total`
#[derive(Debug, Clone)]
pub struct NodeQueue {
    heap: Vec<NodeIndex>,
    capacity: usize,
}

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn top(&self) -> Option<NodeIndex> {
        self.heap.first().copied()
    }

    /// Adds a node. Returns false when the queue is full.
    pub fn push(&mut self, pool: &NodePool, idx: NodeIndex) -> bool {
        if self.heap.len() >= self.capacity {
            return false;
        }
        self.heap.push(idx);
        self.bubble_up(pool, self.heap.len() - 1);
        true
    }

    /// Removes the node with the lowest total cost
    pub fn pop(&mut self, pool: &NodePool) -> Option<NodeIndex> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.trickle_down(pool, 0);
        }
        Some(top)
    }

    /// Restores the heap order after the total of `idx` decreased
    pub fn modify(&mut self, pool: &NodePool, idx: NodeIndex) {
        if let Some(i) = self.heap.iter().position(|&n| n == idx) {
            self.bubble_up(pool, i);
        }
    }

    fn bubble_up(&mut self, pool: &NodePool, mut i: usize) {
        let node = self.heap[i];
        let total = pool.node(node).total;
        while i > 0 {
            let parent = (i - 1) / 2;
            if pool.node(self.heap[parent]).total <= total {
                break;
            }
            self.heap[i] = self.heap[parent];
            i = parent;
        }
        self.heap[i] = node;
    }

    fn trickle_down(&mut self, pool: &NodePool, mut i: usize) {
        let node = self.heap[i];
        let total = pool.node(node).total;
        let len = self.heap.len();
        loop {
            let mut child = i * 2 + 1;
            if child >= len {
                break;
            }
            if child + 1 < len && pool.node(self.heap[child + 1]).total < pool.node(self.heap[child]).total {
                child += 1;
            }
            if pool.node(self.heap[child]).total >= total {
                break;
            }
            self.heap[i] = self.heap[child];
            i = child;
        }
        self.heap[i] = node;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_node_reuses_state() {
        let mut pool = NodePool::new(8);
        let r = PolyRef::encode(1, 0, 3);
        let a = pool.get_node(r, 0).unwrap();
        let b = pool.get_node(r, 0).unwrap();
        let c = pool.get_node(r, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.find_nodes(r).len(), 2);
        assert_eq!(pool.node(c).state, 1);
        assert!(pool.find_node(PolyRef::encode(1, 0, 4), 0).is_none());
    }

    #[test]
    fn test_pool_exhaustion() {
        let mut pool = NodePool::new(2);
        assert!(pool.get_node(PolyRef::encode(1, 0, 1), 0).is_some());
        assert!(pool.get_node(PolyRef::encode(1, 0, 2), 0).is_some());
        assert!(pool.get_node(PolyRef::encode(1, 0, 3), 0).is_none());
        pool.clear();
        assert_eq!(pool.node_count(), 0);
        assert!(pool.get_node(PolyRef::encode(1, 0, 3), 0).is_some());
    }

    #[test]
    fn test_queue_orders_by_total() {
        let mut pool = NodePool::new(16);
        let mut queue = NodeQueue::new(16);
        for (i, total) in [5.0, 1.0, 3.0, 4.0, 2.0].into_iter().enumerate() {
            let n = pool.get_node(PolyRef::encode(1, 0, i as u32 + 1), 0).unwrap();
            pool.node_mut(n).total = total;
            assert!(queue.push(&pool, n));
        }

        // Lower the first node below everything else.
        let first = pool.find_node(PolyRef::encode(1, 0, 1), 0).unwrap();
        pool.node_mut(first).total = 0.5;
        queue.modify(&pool, first);

        let mut order = Vec::new();
        while let Some(n) = queue.pop(&pool) {
            order.push(pool.node(n).total);
        }
        assert_eq!(order, vec![0.5, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_full_queue_rejects_push() {
        let mut pool = NodePool::new(4);
        let mut queue = NodeQueue::new(1);
        let a = pool.get_node(PolyRef::encode(1, 0, 1), 0).unwrap();
        let b = pool.get_node(PolyRef::encode(1, 0, 2), 0).unwrap();
        assert!(queue.push(&pool, a));
        assert!(!queue.push(&pool, b));
        assert_eq!(queue.len(), 1);
    }
}
