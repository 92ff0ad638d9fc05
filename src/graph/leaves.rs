//! Caller-owned leaf tensors.
//!
//! Leaves outlive sweeps but not their owner's interest in them: a leaf can
//! be released with [`LeafStore::remove`], which frees its slot for reuse and
//! bumps the slot's generation. A [`LeafId`] carries the generation it was
//! issued with, so a handle to a released leaf is rejected with
//! [`TensorError::UseAfterReclaim`] even after the slot holds a new tensor.

use std::{cmp::Ordering, fmt};

use crate::{
    error::TensorError,
    graph::{GraphId, TensorId},
};

/// Handle to a leaf in a [`LeafStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafId {
    index: usize,
    generation: u32,
    graph: GraphId,
}

impl LeafId {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "leaf#{}", self.index)
        } else {
            write!(f, "leaf#{}.{}", self.index, self.generation)
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot map of live leaves with free-slot reuse.
#[derive(Debug)]
pub struct LeafStore<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    owner: GraphId,
}

impl<T> LeafStore<T> {
    pub fn new(owner: GraphId) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            owner,
        }
    }

    /// Stores `value`, reusing a released slot if one is free.
    pub fn insert(&mut self, value: T) -> LeafId {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].value = Some(value);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                self.slots.len() - 1
            }
        };
        LeafId {
            index,
            generation: self.slots[index].generation,
            graph: self.owner,
        }
    }

    /// # Errors
    /// Returns [`TensorError::UseAfterReclaim`] for a released leaf and
    /// [`TensorError::UnknownTensor`] for a handle this store never issued.
    pub fn get(&self, id: LeafId) -> Result<&T, TensorError> {
        let index = self.check(id)?;
        self.slots[index]
            .value
            .as_ref()
            .ok_or(TensorError::UnknownTensor { id: TensorId::Leaf(id) })
    }

    /// # Errors
    /// See [`LeafStore::get`].
    pub fn get_mut(&mut self, id: LeafId) -> Result<&mut T, TensorError> {
        let index = self.check(id)?;
        self.slots[index]
            .value
            .as_mut()
            .ok_or(TensorError::UnknownTensor { id: TensorId::Leaf(id) })
    }

    /// Takes the leaf out of the store. Its handle, and every copy of it,
    /// becomes stale.
    ///
    /// # Errors
    /// See [`LeafStore::get`].
    pub fn remove(&mut self, id: LeafId) -> Result<T, TensorError> {
        let index = self.check(id)?;
        let slot = &mut self.slots[index];
        let value = slot
            .value
            .take()
            .ok_or(TensorError::UnknownTensor { id: TensorId::Leaf(id) })?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        Ok(value)
    }

    /// Number of live leaves.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates `id` against this store and returns its slot index.
    fn check(&self, id: LeafId) -> Result<usize, TensorError> {
        let unknown = || TensorError::UnknownTensor { id: TensorId::Leaf(id) };
        if id.graph != self.owner {
            return Err(unknown());
        }
        let slot = self.slots.get(id.index).ok_or_else(unknown)?;
        match id.generation.cmp(&slot.generation) {
            Ordering::Less => Err(TensorError::UseAfterReclaim { id: TensorId::Leaf(id) }),
            Ordering::Greater => Err(unknown()),
            Ordering::Equal => Ok(id.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut store = LeafStore::new(GraphId::next());
        let a = store.insert("a");
        let b = store.insert("b");
        assert_eq!(store.len(), 2);
        assert_eq!(*store.get(b).unwrap(), "b");
        *store.get_mut(a).unwrap() = "z";
        assert_eq!(store.remove(a).unwrap(), "z");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(a), Err(TensorError::UseAfterReclaim { id: TensorId::Leaf(a) }));
        assert_eq!(
            store.remove(a),
            Err(TensorError::UseAfterReclaim { id: TensorId::Leaf(a) })
        );
    }

    #[test]
    fn released_slots_are_reused() {
        let mut store = LeafStore::new(GraphId::next());
        let old = store.insert(1);
        store.remove(old).unwrap();
        let fresh = store.insert(2);
        assert_eq!(fresh.index(), old.index());
        assert_eq!(fresh.generation(), 1);
        assert_eq!(fresh.to_string(), "leaf#0.1");
        assert_eq!(*store.get(fresh).unwrap(), 2);
        assert!(matches!(store.get(old), Err(TensorError::UseAfterReclaim { .. })));
    }

    #[test]
    fn foreign_handles_are_unknown() {
        let mut other = LeafStore::new(GraphId::next());
        let foreign = other.insert(0);

        let mut store = LeafStore::new(GraphId::next());
        store.insert(0);
        assert_eq!(
            store.get(foreign),
            Err(TensorError::UnknownTensor { id: TensorId::Leaf(foreign) })
        );
        assert!(!store.is_empty());
    }
}
