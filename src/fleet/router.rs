//! Hash Ring Router
//!
//! Deterministic `path -> Node` placement. The ring is built once from the
//! configured fleet and is read-only afterwards, so it can be shared freely
//! between tasks.

use num_bigint::BigUint;

use super::hash::PathHasher;
use super::types::Node;

pub struct HashRouter {
    /// `(upper boundary, node)` pairs in ascending boundary order.
    ring: Vec<(BigUint, Node)>,
    hasher: Box<dyn PathHasher>,
}

impl HashRouter {
    /// Builds the ring for `fleet`.
    ///
    /// With `max = 2^B - 1` and `step = max / n`, node `i` gets the upper
    /// boundary `step * (i + 1)`, except the last node whose boundary is
    /// `max` so the integer-division remainder is never orphaned.
    pub fn new(fleet: Vec<Node>, hasher: Box<dyn PathHasher>) -> Self {
        let count = fleet.len();
        if count == 0 {
            return Self {
                ring: Vec::new(),
                hasher,
            };
        }

        let max = (BigUint::from(1u32) << hasher.key_bits()) - BigUint::from(1u32);
        let step = &max / BigUint::from(count);

        let ring = fleet
            .into_iter()
            .enumerate()
            .map(|(i, node)| {
                let boundary = if i + 1 == count {
                    max.clone()
                } else {
                    &step * BigUint::from(i + 1)
                };
                (boundary, node)
            })
            .collect();

        Self { ring, hasher }
    }

    /// Owning node for `path`, or `None` for an empty fleet.
    pub fn lookup(&self, path: &str) -> Option<&Node> {
        let key = self.hasher.hash(path);
        self.ring
            .iter()
            .find(|(boundary, _)| *boundary >= key)
            .map(|(_, node)| node)
    }

    /// Every node in ring order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.ring.iter().map(|(_, node)| node)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn key_bits(&self) -> u32 {
        self.hasher.key_bits()
    }

    /// Inclusive `(start, end)` key range owned by each node.
    pub fn ranges(&self) -> Vec<(BigUint, BigUint, &Node)> {
        let mut start = BigUint::from(0u32);
        let mut out = Vec::with_capacity(self.ring.len());
        for (boundary, node) in &self.ring {
            out.push((start.clone(), boundary.clone(), node));
            start = boundary + BigUint::from(1u32);
        }
        out
    }
}
