//! Per-process table of managed objects.
//!
//! Every rank owns one [`HandleArena`]. Ids are handed out from a monotone counter,
//! so ranks that perform the same sequence of managed calls assign the same id to
//! their respective instances without ever negotiating.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::any::{Any, type_name};
use std::fmt;

use crate::dispatch_error::DispatchError;

/// Opaque reference to an object that exists once per rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(u64);

impl HandleId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owned objects keyed by [`HandleId`].
#[derive(Default)]
pub struct HandleArena {
    objects: HashMap<HandleId, Box<dyn Any>>,
    next: u64,
}

impl fmt::Debug for HandleArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleArena")
            .field("ids", &self.ids())
            .field("next", &self.next)
            .finish()
    }
}

impl HandleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next id without storing anything under it yet.
    pub fn reserve(&mut self) -> HandleId {
        self.next += 1;
        HandleId(self.next)
    }

    /// Store `object` under a previously reserved id.
    pub fn insert_at(&mut self, id: HandleId, object: Box<dyn Any>) -> Result<(), DispatchError> {
        if id.0 > self.next {
            return Err(DispatchError::InvalidArgument(format!(
                "handle {id} was never reserved"
            )));
        }
        if self.objects.contains_key(&id) {
            return Err(DispatchError::InvalidArgument(format!(
                "handle {id} is already occupied"
            )));
        }
        self.objects.insert(id, object);
        Ok(())
    }

    /// Reserve an id and store `value` under it.
    pub fn insert<T: Any>(&mut self, value: T) -> HandleId {
        let id = self.reserve();
        self.objects.insert(id, Box::new(value));
        id
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.objects.contains_key(&id)
    }

    /// `true` if `id` is present and holds a `T`.
    pub fn holds<T: Any>(&self, id: HandleId) -> bool {
        self.objects.get(&id).is_some_and(|o| o.is::<T>())
    }

    pub fn get<T: Any>(&self, id: HandleId) -> Result<&T, DispatchError> {
        self.objects
            .get(&id)
            .ok_or(DispatchError::UnknownHandle(id))?
            .downcast_ref::<T>()
            .ok_or(DispatchError::HandleType {
                id,
                expected: type_name::<T>(),
            })
    }

    pub fn get_mut<T: Any>(&mut self, id: HandleId) -> Result<&mut T, DispatchError> {
        self.objects
            .get_mut(&id)
            .ok_or(DispatchError::UnknownHandle(id))?
            .downcast_mut::<T>()
            .ok_or(DispatchError::HandleType {
                id,
                expected: type_name::<T>(),
            })
    }

    pub fn remove(&mut self, id: HandleId) -> Result<Box<dyn Any>, DispatchError> {
        self.objects
            .remove(&id)
            .ok_or(DispatchError::UnknownHandle(id))
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self.objects.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drop every object; ids keep counting upwards.
    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_call_order() {
        let mut a = HandleArena::new();
        let mut b = HandleArena::new();
        let ia = [a.insert(1u32), a.insert("x"), a.reserve(), a.insert(2.0f64)];
        let ib = [b.insert(7u32), b.insert("y"), b.reserve(), b.insert(3.0f64)];
        assert_eq!(ia, ib);
        assert!(ia.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn typed_access() {
        let mut arena = HandleArena::new();
        let id = arena.insert(vec![1.0f64, 2.0]);
        assert_eq!(arena.get::<Vec<f64>>(id).unwrap().len(), 2);
        arena.get_mut::<Vec<f64>>(id).unwrap().push(3.0);
        assert_eq!(arena.get::<Vec<f64>>(id).unwrap().len(), 3);
        assert!(matches!(
            arena.get::<String>(id),
            Err(DispatchError::HandleType { .. })
        ));
        assert!(arena.holds::<Vec<f64>>(id));
        assert!(!arena.holds::<String>(id));
    }

    #[test]
    fn removal_is_explicit() {
        let mut arena = HandleArena::new();
        let id = arena.insert(5u8);
        assert!(arena.remove(id).is_ok());
        assert!(matches!(arena.remove(id), Err(DispatchError::UnknownHandle(_))));
        assert!(matches!(arena.get::<u8>(id), Err(DispatchError::UnknownHandle(_))));
        // ids are never reused
        assert!(arena.insert(6u8) > id);
    }

    #[test]
    fn reserved_slots_fill_once() {
        let mut arena = HandleArena::new();
        let id = arena.reserve();
        arena.insert_at(id, Box::new(1i32)).unwrap();
        assert!(arena.insert_at(id, Box::new(2i32)).is_err());
        let future = HandleId(id.get() + 10);
        assert!(arena.insert_at(future, Box::new(3i32)).is_err());
    }
}
