//! # Slot Arena
//!
//! Fixed-capacity storage whose handles survive unrelated removals.
//!
//! A [`Key`] names a slot index plus the generation the slot had when the
//! value was inserted. Removing a value bumps the slot's generation, so a
//! key held past its value's removal is detected as stale instead of
//! silently naming whatever is stored there next. Values never move
//! between slots.

/// Generation-checked handle into an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    index: u16,
    generation: u32,
}

impl Key {
    /// Slot index part of this key.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation part of this key.
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-size table of `N` slots holding values of type `T`.
pub struct Arena<T, const N: usize> {
    slots: [Slot<T>; N],
    len: usize,
}

impl<T, const N: usize> Arena<T, N> {
    /// Create an empty arena.
    pub const fn new() -> Self {
        Self {
            slots: [const { Slot { generation: 0, value: None } }; N],
            len: 0,
        }
    }

    /// Number of occupied slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Insert a value built from its own key into the lowest free slot.
    ///
    /// Returns `None` (and does not call `f`) when every slot is taken.
    pub fn insert_with<F>(&mut self, f: F) -> Option<Key>
    where
        F: FnOnce(Key) -> T,
    {
        let index = self.slots.iter().position(|s| s.value.is_none())?;
        let slot = &mut self.slots[index];
        let key = Key {
            index: index as u16,
            generation: slot.generation,
        };
        slot.value = Some(f(key));
        self.len += 1;
        Some(key)
    }

    /// Remove the value named by `key`, invalidating every copy of the key.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    /// Remove every value. All outstanding keys become stale.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
        }
        self.len = 0;
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        let slot = self.slots.get(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            let key = Key {
                index: i as u16,
                generation: s.generation,
            };
            s.value.as_ref().map(|v| (key, v))
        })
    }

    /// Occupied slots in slot order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Key, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, s)| {
            let key = Key {
                index: i as u16,
                generation: s.generation,
            };
            s.value.as_mut().map(|v| (key, v))
        })
    }
}

impl<T, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_fills_lowest_slot() {
        let mut arena: Arena<u32, 4> = Arena::new();
        let a = arena.insert_with(|_| 10).unwrap();
        let b = arena.insert_with(|_| 20).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.len(), 2);

        arena.remove(a).unwrap();
        let c = arena.insert_with(|_| 30).unwrap();
        assert_eq!(c.index(), 0);
        assert_ne!(c, a);
    }

    #[test]
    fn test_stale_key_rejected() {
        let mut arena: Arena<u32, 2> = Arena::new();
        let a = arena.insert_with(|_| 1).unwrap();
        assert_eq!(arena.remove(a), Some(1));
        assert!(arena.get(a).is_none());
        assert!(arena.remove(a).is_none());

        let b = arena.insert_with(|_| 2).unwrap();
        assert_eq!(b.index(), a.index());
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn test_removal_leaves_other_keys_valid() {
        let mut arena: Arena<u32, 4> = Arena::new();
        let keys = [
            arena.insert_with(|_| 0).unwrap(),
            arena.insert_with(|_| 1).unwrap(),
            arena.insert_with(|_| 2).unwrap(),
        ];
        arena.remove(keys[0]).unwrap();
        assert_eq!(arena.get(keys[1]), Some(&1));
        assert_eq!(arena.get(keys[2]), Some(&2));
    }

    #[test]
    fn test_full_does_not_call_builder() {
        let mut arena: Arena<u32, 1> = Arena::new();
        arena.insert_with(|_| 1).unwrap();
        let mut called = false;
        assert!(arena
            .insert_with(|_| {
                called = true;
                2
            })
            .is_none());
        assert!(!called);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_clear_invalidates_keys() {
        let mut arena: Arena<u32, 2> = Arena::new();
        let a = arena.insert_with(|_| 1).unwrap();
        arena.clear();
        assert!(arena.is_empty());
        assert!(arena.get(a).is_none());
    }

    #[test]
    fn test_key_passed_to_builder() {
        let mut arena: Arena<Key, 2> = Arena::new();
        let k = arena.insert_with(|k| k).unwrap();
        assert_eq!(arena.get(k), Some(&k));
    }
}
