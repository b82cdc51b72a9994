//! Object table: an arena indexed by id.
//!
//! One slab per id range, slot index `id - range.first()`. Every slot keeps
//! a generation that is bumped when its object is removed, so an
//! [`ObjectRef`] taken before a destroy never matches a later object that
//! reuses the same id.
//!
//! Slabs grow densely only while ids stay close to the current end; an id
//! far past it lands in a sparse overflow map instead, so a single large
//! `new_id` from a peer cannot force a huge allocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::ids::IdRange;
use super::{DestroyListener, Dispatch, Lifecycle, ListenerId, ObjectRef};
use crate::error::{Result, WireError};

/// A live table entry.
pub(crate) struct Entry {
    pub(crate) object: Arc<dyn Dispatch>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) listeners: Vec<(ListenerId, DestroyListener)>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// How far past the dense end an id may land and still grow the slab.
const DENSE_SLACK: usize = 64;

struct Arena {
    range: IdRange,
    slots: Vec<Slot>,
    sparse: BTreeMap<usize, Slot>,
}

impl Arena {
    fn new(range: IdRange) -> Self {
        Self {
            range,
            slots: Vec::new(),
            sparse: BTreeMap::new(),
        }
    }

    #[inline]
    fn index(&self, id: u32) -> usize {
        (id - self.range.first()) as usize
    }

    fn slot(&self, id: u32) -> Option<&Slot> {
        let index = self.index(id);
        self.slots.get(index).or_else(|| self.sparse.get(&index))
    }

    fn slot_mut(&mut self, id: u32) -> Option<&mut Slot> {
        let index = self.index(id);
        match self.slots.get_mut(index) {
            Some(slot) => Some(slot),
            None => self.sparse.get_mut(&index),
        }
    }

    /// Slot for `index`, creating it densely or sparsely.
    fn slot_for_insert(&mut self, index: usize) -> &mut Slot {
        if index >= self.slots.len() && index < self.slots.len() + DENSE_SLACK {
            let len = index + 1;
            self.slots.resize_with(len, Slot::default);
            // Sparse slots now covered by the slab move in, keeping their generation.
            let tail = self.sparse.split_off(&len);
            for (covered, slot) in std::mem::replace(&mut self.sparse, tail) {
                self.slots[covered] = slot;
            }
        }
        if index < self.slots.len() {
            &mut self.slots[index]
        } else {
            self.sparse.entry(index).or_default()
        }
    }

    /// Live indices, highest first.
    fn live_descending(&self) -> Vec<usize> {
        let mut live: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .chain(self.sparse.iter().map(|(index, slot)| (*index, slot)))
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, _)| index)
            .collect();
        live.sort_unstable_by(|a, b| b.cmp(a));
        live
    }
}

/// Id to object map for one connection.
pub(crate) struct ObjectTable {
    client: Arena,
    server: Arena,
    max_index: u32,
    len: usize,
    next_listener: u64,
}

impl ObjectTable {
    /// Create an empty table accepting slot indices up to `max_index`.
    pub(crate) fn new(max_index: u32) -> Self {
        Self {
            client: Arena::new(IdRange::Client),
            server: Arena::new(IdRange::Server),
            max_index,
            len: 0,
            next_listener: 0,
        }
    }

    fn arena(&self, id: u32) -> Option<&Arena> {
        match IdRange::of(id)? {
            IdRange::Client => Some(&self.client),
            IdRange::Server => Some(&self.server),
        }
    }

    fn arena_mut(&mut self, id: u32) -> Option<&mut Arena> {
        match IdRange::of(id)? {
            IdRange::Client => Some(&mut self.client),
            IdRange::Server => Some(&mut self.server),
        }
    }

    /// Insert `object` under `id`.
    pub(crate) fn insert(&mut self, id: u32, object: Arc<dyn Dispatch>) -> Result<ObjectRef> {
        let max_index = self.max_index as usize;
        let arena = self.arena_mut(id).ok_or(WireError::InvalidId(id))?;
        let index = arena.index(id);
        if index > max_index {
            return Err(WireError::InvalidId(id));
        }
        let slot = arena.slot_for_insert(index);
        if slot.entry.is_some() {
            return Err(WireError::DuplicateObject(id));
        }
        slot.entry = Some(Entry {
            object,
            lifecycle: Lifecycle::Active,
            listeners: Vec::new(),
        });
        let generation = slot.generation;
        self.len += 1;
        Ok(ObjectRef { id, generation })
    }

    pub(crate) fn get(&self, id: u32) -> Option<&Entry> {
        self.arena(id)?.slot(id)?.entry.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: u32) -> Option<&mut Entry> {
        self.arena_mut(id)?.slot_mut(id)?.entry.as_mut()
    }

    /// Resolve `id` to its object.
    pub(crate) fn object(&self, id: u32) -> Result<Arc<dyn Dispatch>> {
        self.get(id)
            .map(|entry| entry.object.clone())
            .ok_or(WireError::UnknownObject(id))
    }

    /// Reference to the current incarnation of `id`.
    pub(crate) fn object_ref(&self, id: u32) -> Option<ObjectRef> {
        let slot = self.arena(id)?.slot(id)?;
        slot.entry.as_ref()?;
        Some(ObjectRef {
            id,
            generation: slot.generation,
        })
    }

    /// Remove the entry for `id`, retiring its generation.
    pub(crate) fn remove(&mut self, id: u32) -> Option<Entry> {
        let slot = self.arena_mut(id)?.slot_mut(id)?;
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        Some(entry)
    }

    /// Lifecycle of one incarnation; stale references read as destroyed.
    pub(crate) fn lifecycle(&self, object: ObjectRef) -> Lifecycle {
        let Some(slot) = self.arena(object.id).and_then(|a| a.slot(object.id)) else {
            return Lifecycle::Destroyed;
        };
        match &slot.entry {
            Some(entry) if slot.generation == object.generation => entry.lifecycle,
            _ => Lifecycle::Destroyed,
        }
    }

    pub(crate) fn next_listener_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    #[inline]
    pub(crate) fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Every live id, highest first.
    pub(crate) fn ids_descending(&self) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.len);
        for arena in [&self.server, &self.client] {
            let first = arena.range.first();
            ids.extend(
                arena
                    .live_descending()
                    .into_iter()
                    .map(|index| first + index as u32),
            );
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::object::BoxFuture;
    use crate::protocol::Message;

    struct Dummy;

    impl Dispatch for Dummy {
        fn interface(&self) -> &'static str {
            "dummy"
        }

        fn dispatch<'a>(
            &'a self,
            _connection: &'a Connection,
            _message: &'a mut Message,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_insert_lookup_remove() {
        let mut table = ObjectTable::new(64);
        let r = table.insert(3, Arc::new(Dummy)).unwrap();
        assert_eq!(r.id(), 3);
        assert!(table.contains(3));
        assert_eq!(table.object(3).unwrap().interface(), "dummy");
        assert!(table.remove(3).is_some());
        assert!(matches!(table.object(3), Err(WireError::UnknownObject(3))));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_duplicate_and_invalid_ids() {
        let mut table = ObjectTable::new(16);
        table.insert(2, Arc::new(Dummy)).unwrap();
        assert!(matches!(
            table.insert(2, Arc::new(Dummy)),
            Err(WireError::DuplicateObject(2))
        ));
        assert!(matches!(
            table.insert(0, Arc::new(Dummy)),
            Err(WireError::InvalidId(0))
        ));
        assert!(matches!(
            table.insert(100, Arc::new(Dummy)),
            Err(WireError::InvalidId(100))
        ));
        assert!(table.insert(0xff00_0010, Arc::new(Dummy)).is_ok());
    }

    #[test]
    fn test_generation_catches_stale_refs() {
        let mut table = ObjectTable::new(16);
        let first = table.insert(5, Arc::new(Dummy)).unwrap();
        assert_eq!(table.lifecycle(first), Lifecycle::Active);
        table.remove(5);
        let second = table.insert(5, Arc::new(Dummy)).unwrap();
        assert_ne!(first, second);
        assert_eq!(table.lifecycle(first), Lifecycle::Destroyed);
        assert_eq!(table.lifecycle(second), Lifecycle::Active);
        assert_eq!(table.object_ref(5), Some(second));
    }

    #[test]
    fn test_ids_descending_across_ranges() {
        let mut table = ObjectTable::new(16);
        for id in [1, 4, 0xff00_0002, 2, 0xff00_0000] {
            table.insert(id, Arc::new(Dummy)).unwrap();
        }
        table.remove(2);
        assert_eq!(table.ids_descending(), vec![0xff00_0002, 0xff00_0000, 4, 1]);
    }

    #[test]
    fn test_far_id_does_not_grow_slab() {
        let mut table = ObjectTable::new(1 << 20);
        let far = 1 + (1 << 19);
        let first = table.insert(far, Arc::new(Dummy)).unwrap();
        assert!(table.client.slots.len() <= DENSE_SLACK);
        assert!(table.contains(far));

        table.remove(far);
        assert_eq!(table.lifecycle(first), Lifecycle::Destroyed);
        let second = table.insert(far, Arc::new(Dummy)).unwrap();
        assert_ne!(first.generation(), second.generation());
        assert_eq!(table.ids_descending(), vec![far]);
    }

    #[test]
    fn test_sparse_slots_fold_into_slab() {
        let mut table = ObjectTable::new(1024);
        // Index 100 is past the slack of an empty slab.
        table.insert(101, Arc::new(Dummy)).unwrap();
        assert_eq!(table.client.sparse.len(), 1);
        for id in [1, 51, 102] {
            table.insert(id, Arc::new(Dummy)).unwrap();
        }
        assert!(table.client.sparse.is_empty());
        assert!(table.contains(101));
        assert_eq!(table.ids_descending(), vec![102, 101, 51, 1]);
    }
}
