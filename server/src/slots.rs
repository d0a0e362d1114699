//! Player slot assignment.
//!
//! A room has two player slots. Joining sessions take the first free slot in
//! arrival order; everyone else watches. A vacated slot stays empty until the
//! next join.

use shared::{RoleKind, SessionId};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Player0,
    Player1,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Player0, Slot::Player1];

    pub fn index(self) -> usize {
        match self {
            Slot::Player0 => 0,
            Slot::Player1 => 1,
        }
    }

    /// Which side of the arena this slot's lane is on: -1 left, +1 right.
    pub fn lane_sign(self) -> f32 {
        match self {
            Slot::Player0 => -1.0,
            Slot::Player1 => 1.0,
        }
    }

    pub fn opponent(self) -> Slot {
        match self {
            Slot::Player0 => Slot::Player1,
            Slot::Player1 => Slot::Player0,
        }
    }

    pub fn role_kind(self) -> RoleKind {
        match self {
            Slot::Player0 => RoleKind::Player0,
            Slot::Player1 => RoleKind::Player1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Player{}", self.index())
    }
}

/// Bidirectional slot ⇄ session mapping.
#[derive(Debug, Default, Clone)]
pub struct SlotRegistry {
    slots: [Option<SessionId>; 2],
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_free(&self) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.slots[slot.index()].is_none())
    }

    /// Seats `session_id` in `slot`. Returns false if the slot is taken or the
    /// session already holds a slot.
    pub fn assign(&mut self, slot: Slot, session_id: &str) -> bool {
        if self.slots[slot.index()].is_some() || self.slot_of(session_id).is_some() {
            return false;
        }
        self.slots[slot.index()] = Some(session_id.to_string());
        true
    }

    pub fn release(&mut self, session_id: &str) -> Option<Slot> {
        let slot = self.slot_of(session_id)?;
        self.slots[slot.index()] = None;
        Some(slot)
    }

    pub fn session_in(&self, slot: Slot) -> Option<&SessionId> {
        self.slots[slot.index()].as_ref()
    }

    pub fn slot_of(&self, session_id: &str) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|slot| self.slots[slot.index()].as_deref() == Some(session_id))
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_naming_and_lanes() {
        assert_eq!(Slot::Player0.to_string(), "Player0");
        assert_eq!(Slot::Player1.to_string(), "Player1");
        assert_eq!(Slot::Player0.lane_sign(), -1.0);
        assert_eq!(Slot::Player1.lane_sign(), 1.0);
        assert_eq!(Slot::Player0.opponent(), Slot::Player1);
    }

    #[test]
    fn test_slots_fill_in_arrival_order() {
        let mut registry = SlotRegistry::new();

        let first = registry.first_free().unwrap();
        assert!(registry.assign(first, "a"));
        let second = registry.first_free().unwrap();
        assert!(registry.assign(second, "b"));

        assert_eq!(registry.slot_of("a"), Some(Slot::Player0));
        assert_eq!(registry.slot_of("b"), Some(Slot::Player1));
        assert_eq!(registry.first_free(), None);
        assert_eq!(registry.occupied(), 2);
    }

    #[test]
    fn test_assign_rejects_occupied_slot_and_seated_session() {
        let mut registry = SlotRegistry::new();
        assert!(registry.assign(Slot::Player0, "a"));

        assert!(!registry.assign(Slot::Player0, "b"));
        assert!(!registry.assign(Slot::Player1, "a"));
        assert_eq!(registry.session_in(Slot::Player0).map(String::as_str), Some("a"));
        assert_eq!(registry.session_in(Slot::Player1), None);
    }

    #[test]
    fn test_vacated_slot_is_reused_by_next_join() {
        let mut registry = SlotRegistry::new();
        registry.assign(Slot::Player0, "a");
        registry.assign(Slot::Player1, "b");

        assert_eq!(registry.release("a"), Some(Slot::Player0));
        assert_eq!(registry.release("a"), None);
        assert_eq!(registry.first_free(), Some(Slot::Player0));

        assert!(registry.assign(Slot::Player0, "c"));
        assert_eq!(registry.slot_of("c"), Some(Slot::Player0));
    }
}
