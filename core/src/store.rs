//! Session-local entity cache.
//!
//! One `Collection` per entity kind, keyed by server id. Entries are only
//! ever added or overwritten; nothing is evicted.

use std::collections::HashMap;

use crate::types::{Belonging, Borrow, Entity, EntityKind, Friend, Record};

/// Id-keyed entities of a single kind.
#[derive(Debug, Clone)]
pub struct Collection<T> {
    items: HashMap<u64, T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: HashMap::new() }
    }
}

impl<T: Record> Collection<T> {
    /// Insert or overwrite. Returns the replaced entry, if any.
    pub fn insert(&mut self, item: T) -> Option<T> {
        self.items.insert(item.id(), item)
    }

    /// Insert only when the id is not cached yet. Returns whether it was added.
    pub fn insert_if_absent(&mut self, item: T) -> bool {
        match self.items.entry(item.id()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(item);
                true
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&T> {
        self.items.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }
}

/// Everything a session has materialized so far.
#[derive(Debug, Clone, Default)]
pub struct Store {
    pub friends: Collection<Friend>,
    pub belongings: Collection<Belonging>,
    pub borrowings: Collection<Borrow>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: Entity) {
        match entity {
            Entity::Friend(friend) => {
                self.friends.insert(friend);
            }
            Entity::Belonging(belonging) => {
                self.belongings.insert(belonging);
            }
            Entity::Borrow(borrow) => {
                self.borrowings.insert(borrow);
            }
        }
    }

    pub fn insert_if_absent(&mut self, entity: Entity) -> bool {
        match entity {
            Entity::Friend(friend) => self.friends.insert_if_absent(friend),
            Entity::Belonging(belonging) => self.belongings.insert_if_absent(belonging),
            Entity::Borrow(borrow) => self.borrowings.insert_if_absent(borrow),
        }
    }

    /// Cloned lookup across kinds.
    pub fn get(&self, kind: EntityKind, id: u64) -> Option<Entity> {
        match kind {
            EntityKind::Friend => self.friends.get(id).cloned().map(Entity::Friend),
            EntityKind::Belonging => self.belongings.get(id).cloned().map(Entity::Belonging),
            EntityKind::Borrow => self.borrowings.get(id).cloned().map(Entity::Borrow),
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Friend => self.friends.len(),
            EntityKind::Belonging => self.belongings.len(),
            EntityKind::Borrow => self.borrowings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BelongingRecord, FriendRecord};

    fn friend(id: i64, name: &str, overdue: bool) -> Friend {
        Friend::from_record(FriendRecord { id, name: name.into(), has_overdue: overdue }).unwrap()
    }

    #[test]
    fn insert_overwrites_same_id() {
        let mut store = Store::new();
        store.insert(friend(1, "Sam", false).into());
        store.insert(friend(1, "Sam", true).into());
        assert_eq!(store.len(EntityKind::Friend), 1);
        assert!(store.friends.get(1).unwrap().overdue());
    }

    #[test]
    fn insert_if_absent_keeps_existing() {
        let mut store = Store::new();
        assert!(store.insert_if_absent(friend(1, "Sam", false).into()));
        assert!(!store.insert_if_absent(friend(1, "Bucky", true).into()));
        assert_eq!(store.friends.get(1).unwrap().name(), "Sam");
    }

    #[test]
    fn kinds_are_kept_apart() {
        let mut store = Store::new();
        store.insert(friend(1, "Sam", false).into());
        let belonging =
            Belonging::from_record(BelongingRecord { id: 1, name: "tin cup".into(), is_borrowed: None })
                .unwrap();
        store.insert(belonging.into());
        assert_eq!(store.len(EntityKind::Friend), 1);
        assert_eq!(store.len(EntityKind::Belonging), 1);
        assert_eq!(store.len(EntityKind::Borrow), 0);
        assert_eq!(store.get(EntityKind::Belonging, 1).unwrap().name(), Some("tin cup"));
        assert!(store.get(EntityKind::Borrow, 1).is_none());
    }
}
