//! Entity/component registry (minimal ECS).
//!
//! Entities are recyclable `u32` handles. Each component type lives in its own
//! [`SparseStorage`], a vector of optional slots indexed by handle. Storages are
//! created lazily the first time a type is written and are looked up by
//! `TypeId`, so the registry never needs to know the component set up front.
//!
//! Handles are never exposed on the wire; replication goes through the
//! `NetworkId` component instead.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

/// Opaque entity handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entity(u32);

impl Entity {
    /// Slot index of this handle inside every storage.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Storage for one component type.
///
/// Erasing leaves a hole; the vector is never compacted.
#[derive(Debug, Clone)]
pub struct SparseStorage<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for SparseStorage<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> SparseStorage<T> {
    /// Inserts/replaces the value for `entity`, growing the slot vector if needed.
    pub fn insert(&mut self, entity: Entity, value: T) -> &mut T {
        let idx = entity.index();
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx].insert(value)
    }

    pub fn get(&self, entity: Entity) -> Option<&T> {
        self.slots.get(entity.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<&mut T> {
        self.slots.get_mut(entity.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Empties the slot and returns the previous value.
    pub fn erase(&mut self, entity: Entity) -> Option<T> {
        self.slots.get_mut(entity.index()).and_then(Option::take)
    }

    /// Number of slots, holes included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Iterates occupied slots in ascending handle order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (Entity(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Entity, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (Entity(i as u32), v)))
    }
}

/// Type-erased view of a storage so the registry can erase a destroyed
/// entity from every storage without knowing the concrete types.
trait ErasedStorage: Send {
    fn erase_entity(&mut self, entity: Entity);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static + Send> ErasedStorage for SparseStorage<T> {
    fn erase_entity(&mut self, entity: Entity) {
        self.erase(entity);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owns entity identity and every component storage.
#[derive(Default)]
pub struct Registry {
    next_id: u32,
    free: Vec<Entity>,
    alive: Vec<bool>,
    alive_count: usize,
    storages: HashMap<TypeId, Box<dyn ErasedStorage>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an entity, reusing the most recently freed handle if any.
    pub fn spawn(&mut self) -> Entity {
        let entity = match self.free.pop() {
            Some(e) => e,
            None => {
                let e = Entity(self.next_id);
                self.next_id += 1;
                self.alive.push(false);
                e
            }
        };
        self.alive[entity.index()] = true;
        self.alive_count += 1;
        entity
    }

    /// Erases `entity` from every storage and recycles its handle.
    ///
    /// Returns `false` (and does nothing) if the handle is not alive.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        for storage in self.storages.values_mut() {
            storage.erase_entity(entity);
        }
        self.alive[entity.index()] = false;
        self.alive_count -= 1;
        self.free.push(entity);
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.get(entity.index()).copied().unwrap_or(false)
    }

    pub fn alive_count(&self) -> usize {
        self.alive_count
    }

    /// Live handles in ascending order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(i, _)| Entity(i as u32))
    }

    /// Ensures a storage exists for `T`.
    pub fn register<T: 'static + Send>(&mut self) {
        self.storage_mut::<T>();
    }

    /// Read view of the storage for `T`; `None` if nothing ever stored a `T`.
    pub fn storage<T: 'static + Send>(&self) -> Option<&SparseStorage<T>> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any().downcast_ref::<SparseStorage<T>>())
    }

    /// Mutable view of the storage for `T`, created on first request.
    pub fn storage_mut<T: 'static + Send>(&mut self) -> &mut SparseStorage<T> {
        self.storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(SparseStorage::<T>::default()))
            .as_any_mut()
            .downcast_mut::<SparseStorage<T>>()
            .expect("storage keyed by TypeId holds that type")
    }

    /// Inserts/replaces a component on a live entity. Writes to dead handles are ignored.
    pub fn insert<T: 'static + Send>(&mut self, entity: Entity, component: T) {
        if self.is_alive(entity) {
            self.storage_mut::<T>().insert(entity, component);
        }
    }

    pub fn get<T: 'static + Send>(&self, entity: Entity) -> Option<&T> {
        self.storage::<T>().and_then(|s| s.get(entity))
    }

    pub fn get_mut<T: 'static + Send>(&mut self, entity: Entity) -> Option<&mut T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<SparseStorage<T>>())
            .and_then(|s| s.get_mut(entity))
    }

    pub fn has<T: 'static + Send>(&self, entity: Entity) -> bool {
        self.get::<T>(entity).is_some()
    }

    pub fn remove<T: 'static + Send>(&mut self, entity: Entity) -> Option<T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.as_any_mut().downcast_mut::<SparseStorage<T>>())
            .and_then(|s| s.erase(entity))
    }

    /// Iterates entities carrying a `T`.
    pub fn iter<T: 'static + Send>(&self) -> impl Iterator<Item = (Entity, &T)> {
        self.storage::<T>().into_iter().flat_map(SparseStorage::iter)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::components::{Health, Position, Velocity};

    #[test]
    fn spawn_is_sequential_then_recycles_lifo() {
        let mut reg = Registry::new();
        let a = reg.spawn();
        let b = reg.spawn();
        let c = reg.spawn();
        assert_eq!((a.raw(), b.raw(), c.raw()), (0, 1, 2));

        reg.destroy(a);
        reg.destroy(c);
        assert_eq!(reg.spawn(), c);
        assert_eq!(reg.spawn(), a);
        assert_eq!(reg.spawn().raw(), 3);
    }

    #[test]
    fn destroy_erases_every_registered_storage() {
        let mut reg = Registry::new();
        reg.register::<Health>();
        let e = reg.spawn();
        reg.insert(e, Position { x: 1.0, y: 2.0 });
        reg.insert(e, Velocity { x: 3.0, y: 4.0 });

        assert!(reg.destroy(e));
        assert!(!reg.has::<Position>(e));
        assert!(!reg.has::<Velocity>(e));
        assert!(!reg.has::<Health>(e));

        // Recycled handle starts clean.
        let again = reg.spawn();
        assert_eq!(again, e);
        assert!(!reg.has::<Position>(again));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        assert!(reg.destroy(e));
        assert!(!reg.destroy(e));
        assert_eq!(reg.alive_count(), 0);

        // A double destroy must not put the handle on the free list twice.
        let a = reg.spawn();
        let b = reg.spawn();
        assert_ne!(a, b);
    }

    #[test]
    fn live_handles_are_never_shared() {
        let mut reg = Registry::new();
        let mut live: Vec<Entity> = (0..16).map(|_| reg.spawn()).collect();
        for round in 0..50usize {
            let victim = live.remove(round % live.len());
            reg.destroy(victim);
            live.push(reg.spawn());
            if round % 3 == 0 {
                live.push(reg.spawn());
            }
            let unique: HashSet<_> = live.iter().copied().collect();
            assert_eq!(unique.len(), live.len());
            assert_eq!(reg.alive_count(), live.len());
        }
    }

    #[test]
    fn missing_storage_reads_as_empty() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        assert!(reg.storage::<Position>().is_none());
        assert!(reg.get::<Position>(e).is_none());
        assert_eq!(reg.iter::<Position>().count(), 0);
        assert!(reg.remove::<Position>(e).is_none());
    }

    #[test]
    fn storage_iteration_skips_holes() {
        let mut reg = Registry::new();
        let ents: Vec<Entity> = (0..5).map(|_| reg.spawn()).collect();
        for (i, e) in ents.iter().enumerate() {
            reg.insert(*e, Position { x: i as f32, y: 0.0 });
        }
        reg.remove::<Position>(ents[1]);
        reg.destroy(ents[3]);

        let alive: Vec<u32> = reg.entities().map(Entity::raw).collect();
        assert_eq!(alive, vec![0, 1, 2, 4]);

        let storage = reg.storage::<Position>().unwrap();
        assert_eq!(storage.capacity(), 5);
        let seen: Vec<u32> = storage.iter().map(|(e, _)| e.raw()).collect();
        assert_eq!(seen, vec![0, 2, 4]);
    }

    #[test]
    fn insert_on_dead_entity_is_ignored() {
        let mut reg = Registry::new();
        let e = reg.spawn();
        reg.destroy(e);
        reg.insert(e, Position::default());
        assert!(!reg.has::<Position>(e));
    }
}
