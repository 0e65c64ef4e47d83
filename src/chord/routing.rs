use crate::chord::types::{Node, RingId};
use crate::chord::FINGER_TABLE_SIZE;
use serde::Serialize;

/// Routing table of one node.
///
/// `fingers[i]` should be the first live node at or after `local.id + 2^i`;
/// `fingers[0]` is always the current successor. Entries never dangle: a
/// removed node is replaced by `local` itself. The table does no locking of
/// its own, the protocol serializes access.
#[derive(Debug, Clone, Serialize)]
pub struct FingerTable {
    local: Node,
    fingers: Vec<Node>,
}

impl FingerTable {
    /// A freshly booted node is its own successor in every slot
    pub fn new(local: Node) -> Self {
        Self {
            local,
            fingers: vec![local; FINGER_TABLE_SIZE],
        }
    }

    pub fn local(&self) -> Node {
        self.local
    }

    pub fn successor(&self) -> Node {
        self.fingers[0]
    }

    pub fn set_successor(&mut self, node: Node) {
        self.fingers[0] = node;
    }

    pub fn get(&self, index: usize) -> Option<Node> {
        self.fingers.get(index).copied()
    }

    /// Overwrites one slot. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, node: Node) {
        if let Some(slot) = self.fingers.get_mut(index) {
            *slot = node;
        }
    }

    pub fn entries(&self) -> &[Node] {
        &self.fingers
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.fingers.contains(node)
    }

    /// Directed relaxation: `node` takes every slot whose ideal start it is
    /// strictly closer to than the current occupant.
    pub fn insert(&mut self, node: Node) {
        if node == self.local {
            return;
        }
        for (i, slot) in self.fingers.iter_mut().enumerate() {
            let start = self.local.id.finger_start(i);
            if start.distance(&node.id) < start.distance(&slot.id) {
                *slot = node;
            }
        }
    }

    /// Every slot holding `node` falls back to the local node
    pub fn remove(&mut self, node: &Node) {
        for slot in self.fingers.iter_mut() {
            if slot == node {
                *slot = self.local;
            }
        }
    }

    /// The known node that precedes `id` most closely, i.e. lies in
    /// `(local, id]` with the smallest forward distance to `id`.
    /// Falls back to the local node.
    pub fn find_closest_predecessor(&self, id: RingId) -> Node {
        self.fingers
            .iter()
            .filter(|n| **n != self.local && n.id.between(&self.local.id, &id))
            .min_by_key(|n| (n.id.distance(&id), n.id))
            .copied()
            .unwrap_or(self.local)
    }

    /// The known node that follows `id` most closely (smallest forward
    /// distance from `id`), never the local node itself unless nothing else
    /// is known.
    pub fn find_closest_successor(&self, id: RingId) -> Node {
        self.fingers
            .iter()
            .filter(|n| **n != self.local)
            .min_by_key(|n| (id.distance(&n.id), n.id))
            .copied()
            .unwrap_or(self.local)
    }
}
