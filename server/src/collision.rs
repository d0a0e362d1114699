//! Overlap queries over a fixed group of bodies.
//!
//! The engine keeps one detector for "ball vs. deadzones" and one for
//! "ball vs. paddles" and queries both once per tick.

use crate::physics::{BodyHandle, PhysicsWorld};

/// Two overlapping bodies. `a` joined the detector before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub a: BodyHandle,
    pub b: BodyHandle,
}

impl Pair {
    /// Returns the member of the pair that is not `handle`, if `handle` is in it.
    pub fn other(&self, handle: BodyHandle) -> Option<BodyHandle> {
        if self.a == handle {
            Some(self.b)
        } else if self.b == handle {
            Some(self.a)
        } else {
            None
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CollisionDetector {
    bodies: Vec<BodyHandle>,
}

impl CollisionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: BodyHandle) {
        if !self.contains(handle) {
            self.bodies.push(handle);
        }
    }

    pub fn remove(&mut self, handle: BodyHandle) -> bool {
        let before = self.bodies.len();
        self.bodies.retain(|h| *h != handle);
        self.bodies.len() != before
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.bodies.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Returns every overlapping pair in the group.
    ///
    /// Pairs are ordered by the detector's registration order (outer index
    /// first), so "the first pair" is reproducible across runs. Pairs of two
    /// static bodies and bodies no longer in the world are skipped.
    pub fn collisions(&self, world: &PhysicsWorld) -> Vec<Pair> {
        let mut pairs = Vec::new();
        for (i, &a) in self.bodies.iter().enumerate() {
            let Some(body_a) = world.get(a) else {
                continue;
            };
            for &b in &self.bodies[i + 1..] {
                let Some(body_b) = world.get(b) else {
                    continue;
                };
                if body_a.is_static && body_b.is_static {
                    continue;
                }
                if world.overlap(a, b) {
                    pairs.push(Pair { a, b });
                }
            }
        }
        pairs
    }
}
