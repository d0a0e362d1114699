//! Set of active room ids for the hosting process.
//!
//! Rooms share nothing but this registry, and only for existence checks. It
//! is created once by the server and handed to every room it creates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashSet<String>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // A panic while holding the lock cannot leave the set half-updated
        self.rooms.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a room id. Returns false if it is already active.
    pub fn register(&self, room_id: &str) -> bool {
        self.lock().insert(room_id.to_string())
    }

    /// Unregisters a room id. Returns false if it was not active.
    pub fn unregister(&self, room_id: &str) -> bool {
        self.lock().remove(room_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.lock().contains(room_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = RoomRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.register("room-1"));
        assert!(!registry.register("room-1"));
        assert!(registry.contains("room-1"));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister("room-1"));
        assert!(!registry.unregister("room-1"));
        assert!(!registry.contains("room-1"));
    }

    #[test]
    fn test_clones_share_the_same_set() {
        let registry = RoomRegistry::new();
        let other = registry.clone();

        registry.register("shared");
        assert!(other.contains("shared"));
    }
}
