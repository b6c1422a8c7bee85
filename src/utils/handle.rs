use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Typed, generation-checked index into a [`Pool`].
///
/// A handle stays valid until the slot it names is released; releasing bumps
/// the slot generation, so a stale copy of the handle fails every lookup
/// instead of aliasing whatever is inserted into the slot next.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u16,
    phantom: PhantomData<T>,
}

impl<T> Handle<T> {
    pub fn new(slot: u16, generation: u16) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    /// Packs slot and generation into a single integer.
    pub fn to_raw(self) -> u32 {
        ((self.generation as u32) << 16) | self.slot as u32
    }

    pub fn from_raw(raw: u32) -> Self {
        Self::new((raw & 0xFFFF) as u16, (raw >> 16) as u16)
    }

    /// Reinterprets the handle as naming a different record type.
    pub(crate) fn cast<U>(self) -> Handle<U> {
        Handle::new(self.slot, self.generation)
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.slot, self.generation)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u16>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        const INITIAL_SIZE: usize = 1024;
        Self::new(INITIAL_SIZE)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            // Reverse so slot 0 is handed out first.
            empty: (0..initial_size).rev().collect(),
            generation: vec![0; initial_size],
        };

        p.items.resize_with(initial_size, || None);
        p
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let empty_slot = self.empty.pop()?;

        self.items[empty_slot] = Some(item);

        Some(Handle::new(empty_slot as u16, self.generation[empty_slot]))
    }

    /// Frees the slot and returns the item it held. Stale handles return `None`
    /// and leave the pool untouched.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if slot >= self.items.len() || self.generation[slot] != item.generation {
            return None;
        }

        let value = self.items[slot].take()?;
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(slot);
        Some(value)
    }

    pub fn contains(&self, item: Handle<T>) -> bool {
        self.get_ref(item).is_some()
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        let slot = item.slot as usize;
        if slot < self.items.len() && self.generation[slot] == item.generation {
            self.items[slot].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        let slot = item.slot as usize;
        if slot < self.items.len() && self.generation[slot] == item.generation {
            self.items[slot].as_mut()
        } else {
            None
        }
    }

    pub fn for_each_occupied<F>(&self, mut func: F)
    where
        F: FnMut(&T),
    {
        for item in self.items.iter().flatten() {
            func(item);
        }
    }

    /// Handles of every occupied slot, in slot order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_some())
            .map(|(slot, _)| Handle::new(slot as u16, self.generation[slot]))
            .collect()
    }

    /// Removes every item, invalidating all outstanding handles.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.generation[slot] = self.generation[slot].wrapping_add(1);
                self.empty.push(slot);
                out.push(item);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut pool = Pool::new(4);
        let handle = pool.insert(42u32).unwrap();
        assert_eq!(pool.get_ref(handle), Some(&42));
        *pool.get_mut_ref(handle).unwrap() = 7;
        assert_eq!(pool.get_ref(handle), Some(&7));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn stale_handle_is_rejected_after_release() {
        let mut pool = Pool::new(1);
        let first = pool.insert("a").unwrap();
        assert_eq!(pool.release(first), Some("a"));

        let second = pool.insert("b").unwrap();
        assert_eq!(first.slot, second.slot);
        assert_ne!(first.generation, second.generation);
        assert!(pool.get_ref(first).is_none());
        assert!(pool.release(first).is_none());
        assert_eq!(pool.get_ref(second), Some(&"b"));
    }

    #[test]
    fn exhausted_pool_refuses_inserts() {
        let mut pool = Pool::new(2);
        assert!(pool.insert(1).is_some());
        assert!(pool.insert(2).is_some());
        assert!(pool.insert(3).is_none());
    }

    #[test]
    fn raw_packing_preserves_slot_and_generation() {
        let handle = Handle::<u8>::new(513, 9);
        assert_eq!(Handle::<u8>::from_raw(handle.to_raw()), handle);
    }

    #[test]
    fn debug_does_not_require_debug_payloads() {
        struct Opaque;
        let handle = Handle::<Opaque>::new(3, 1);
        assert_eq!(format!("{:?}", handle), "Handle(3v1)");
    }

    #[test]
    fn drain_invalidates_everything() {
        let mut pool = Pool::new(3);
        let a = pool.insert(1).unwrap();
        let b = pool.insert(2).unwrap();
        let mut drained = pool.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(pool.is_empty());
        assert!(!pool.contains(a));
        assert!(!pool.contains(b));
    }
}
