//! Deadline-ordered eviction queue for idle pool entries
//!
//! Entries are addressed by a stable slot handle. The heap keeps a position
//! table indexed by slot, rewritten on every swap, so an idle entry that gets
//! reacquired can be pulled out of the middle of the heap in O(log n).

use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Node {
    deadline: Instant,
    slot: usize,
}

/// Binary min-heap of slots keyed by expiration deadline
#[derive(Debug, Default)]
pub(crate) struct DeadlineHeap {
    nodes: Vec<Node>,
    /// Current heap index of each slot, `None` while the slot is not queued.
    positions: Vec<Option<usize>>,
}

impl DeadlineHeap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[cfg(test)]
    pub fn contains(&self, slot: usize) -> bool {
        self.position(slot).is_some()
    }

    /// Deadline of a queued slot
    pub fn deadline(&self, slot: usize) -> Option<Instant> {
        self.position(slot).map(|pos| self.nodes[pos].deadline)
    }

    /// Queue `slot` for eviction at `deadline`.
    ///
    /// A slot that is already queued is rescheduled.
    pub fn push(&mut self, slot: usize, deadline: Instant) {
        if let Some(pos) = self.position(slot) {
            self.nodes[pos].deadline = deadline;
            self.restore(pos);
            return;
        }

        if slot >= self.positions.len() {
            self.positions.resize(slot + 1, None);
        }

        let pos = self.nodes.len();
        self.nodes.push(Node { deadline, slot });
        self.positions[slot] = Some(pos);
        self.sift_up(pos);
    }

    /// Earliest deadline without removing it
    pub fn peek(&self) -> Option<(usize, Instant)> {
        self.nodes.first().map(|node| (node.slot, node.deadline))
    }

    pub fn pop(&mut self) -> Option<(usize, Instant)> {
        self.remove_at(0).map(|node| (node.slot, node.deadline))
    }

    /// Remove `slot` wherever it sits in the heap.
    ///
    /// Returns the deadline it was scheduled for, or `None` if it was not queued.
    pub fn remove(&mut self, slot: usize) -> Option<Instant> {
        let pos = self.position(slot)?;
        self.remove_at(pos).map(|node| node.deadline)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.positions.clear();
    }

    fn position(&self, slot: usize) -> Option<usize> {
        self.positions.get(slot).copied().flatten()
    }

    fn remove_at(&mut self, pos: usize) -> Option<Node> {
        let last = self.nodes.len().checked_sub(1)?;
        if pos > last {
            return None;
        }

        self.swap(pos, last);
        let node = self.nodes.pop()?;
        self.positions[node.slot] = None;

        if pos < self.nodes.len() {
            self.restore(pos);
        }

        Some(node)
    }

    /// Move the node at `pos` up or down until the heap property holds again
    fn restore(&mut self, pos: usize) {
        if !self.sift_up(pos) {
            self.sift_down(pos);
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.nodes.swap(a, b);
        self.positions[self.nodes[a].slot] = Some(a);
        self.positions[self.nodes[b].slot] = Some(b);
    }

    fn sift_up(&mut self, mut pos: usize) -> bool {
        let start = pos;
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.nodes[pos].deadline >= self.nodes[parent].deadline {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos != start
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }

            let right = left + 1;
            let smallest = if right < len && self.nodes[right].deadline < self.nodes[left].deadline {
                right
            } else {
                left
            };

            if self.nodes[smallest].deadline >= self.nodes[pos].deadline {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (pos, node) in self.nodes.iter().enumerate() {
            assert_eq!(self.positions[node.slot], Some(pos), "stale position for slot {}", node.slot);
            if pos > 0 {
                let parent = (pos - 1) / 2;
                assert!(self.nodes[parent].deadline <= node.deadline, "heap order broken at {pos}");
            }
        }
        let queued = self.positions.iter().filter(|p| p.is_some()).count();
        assert_eq!(queued, self.nodes.len());
    }
}
