//! Owning handles over native objects.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::native::{self, short_type_name, ObjectId};

/// What the handle's one reference currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// holds the object's unclaimed floating reference
    Floating,
    /// holds a claimed, strong reference
    Owned,
    /// the reference has been given back
    Released,
}

/// A typed owner of exactly one reference to a native object.
///
/// The reference is given back exactly once: by [`Handle::release`], by
/// [`Handle::scoped`] on exit, or by `Drop` as a safety net. Releasing twice
/// is a no-op and any access after release fails with [`Error::Released`].
pub struct Handle<T: Send + 'static> {
    id: ObjectId,
    state: Ownership,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Handle<T> {
    /// Create a new native object owned by the returned handle.
    pub fn new(value: T) -> Self {
        Self {
            id: native::register(value, false),
            state: Ownership::Owned,
            _marker: PhantomData,
        }
    }

    /// Create a new floating object, for passing straight into a call that
    /// takes ownership of it.
    pub fn new_floating(value: T) -> Self {
        Self {
            id: native::register(value, true),
            state: Ownership::Floating,
            _marker: PhantomData,
        }
    }

    /// Take over a reference the caller already owns (transfer-full).
    ///
    /// A floating reference is claimed in place. Returns `None` for a null
    /// id, a dead object or an object of another type.
    pub fn adopt(id: Option<ObjectId>) -> Option<Self> {
        let id = Self::check(id)?;
        if native::is_floating(id)? {
            native::ref_sink(id);
        }
        Some(Self::from_parts(id, Ownership::Owned))
    }

    /// Wrap an object the caller does not own (transfer-none): claim its
    /// floating reference, or take a new one.
    pub fn sink(id: Option<ObjectId>) -> Option<Self> {
        let id = Self::check(id)?;
        native::ref_sink(id).then(|| Self::from_parts(id, Ownership::Owned))
    }

    /// Wrap a floating object without claiming it.
    ///
    /// Meant for values about to be handed to a single call that takes
    /// ownership itself. Non-floating objects get an ordinary new reference.
    pub fn keep_floating(id: Option<ObjectId>) -> Option<Self> {
        let id = Self::check(id)?;
        if native::is_floating(id)? {
            Some(Self::from_parts(id, Ownership::Floating))
        } else {
            native::ref_(id).then(|| Self::from_parts(id, Ownership::Owned))
        }
    }

    fn check(id: Option<ObjectId>) -> Option<ObjectId> {
        let id = id?;
        native::get::<T>(id).map(|_| id)
    }

    fn from_parts(id: ObjectId, state: Ownership) -> Self {
        Self {
            id,
            state,
            _marker: PhantomData,
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.state == Ownership::Released
    }

    pub fn is_floating(&self) -> bool {
        self.state == Ownership::Floating
    }

    fn released_error() -> Error {
        Error::Released {
            type_name: short_type_name::<T>(),
        }
    }

    /// id of the wrapped object
    pub fn id(&self) -> Result<ObjectId> {
        match self.state {
            Ownership::Released => Err(Self::released_error()),
            _ => Ok(self.id),
        }
    }

    /// the object's current reference count
    pub fn ref_count(&self) -> Result<usize> {
        native::ref_count(self.id()?).ok_or_else(Self::released_error)
    }

    /// shared access to the object's cell
    pub fn get(&self) -> Result<Arc<Mutex<T>>> {
        native::get::<T>(self.id()?).ok_or_else(Self::released_error)
    }

    /// run `f` with the object locked
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let cell = self.get()?;
        let mut guard = cell.lock();
        Ok(f(&mut guard))
    }

    /// Whether both handles address the same object.
    pub fn same_object(&self, other: &Handle<T>) -> bool {
        !self.is_released() && !other.is_released() && self.id == other.id
    }

    /// Turn a floating handle into an owning one by claiming the floating
    /// reference. Owned handles are returned unchanged.
    pub fn claim(mut self) -> Result<Self> {
        match self.state {
            Ownership::Released => Err(Self::released_error()),
            Ownership::Owned => Ok(self),
            Ownership::Floating => {
                // sinks the floating reference, or takes a new one if
                // someone else sank it first
                if !native::ref_sink(self.id) {
                    self.state = Ownership::Released;
                    return Err(Self::released_error());
                }
                self.state = Ownership::Owned;
                Ok(self)
            }
        }
    }

    /// Give the reference back. Safe to call any number of times.
    ///
    /// A floating handle only gives back the floating reference if nobody has
    /// sunk it in the meantime.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.state, Ownership::Released) {
            Ownership::Released => {}
            Ownership::Floating => {
                native::unref_floating(self.id);
            }
            Ownership::Owned => {
                native::unref(self.id);
            }
        }
    }

    /// Run `f` with the handle, then release it whatever `f` returned.
    pub fn scoped<R>(mut handle: Self, f: impl FnOnce(&Self) -> R) -> R {
        let result = f(&handle);
        handle.release();
        result
    }
}

impl<T: Send + 'static> Clone for Handle<T> {
    /// Takes an additional strong reference; a clone is never floating.
    fn clone(&self) -> Self {
        match self.state {
            Ownership::Released => Self::from_parts(self.id, Ownership::Released),
            _ if native::ref_(self.id) => Self::from_parts(self.id, Ownership::Owned),
            _ => Self::from_parts(self.id, Ownership::Released),
        }
    }
}

impl<T: Send + 'static> Drop for Handle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Send + 'static> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("type", &short_type_name::<T>())
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Node {
        value: u32,
        children: Vec<Handle<Node>>,
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut handle = Handle::new(Node::default());
        let id = handle.id().unwrap();

        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert!(!native::is_alive(id));
    }

    #[test]
    fn test_use_after_release_fails() {
        let mut handle = Handle::new(Node { value: 3, ..Default::default() });
        assert_eq!(handle.with(|n| n.value).unwrap(), 3);

        handle.release();
        let err = handle.with(|n| n.value).unwrap_err();
        assert!(matches!(err, Error::Released { type_name: "Node" }));
        assert!(handle.id().is_err());
    }

    #[test]
    fn test_clone_shares_refcount() {
        let handle = Handle::new(Node::default());
        let id = handle.id().unwrap();
        let mut other = handle.clone();
        assert_eq!(native::ref_count(id), Some(2));

        other.with(|n| n.value = 9).unwrap();
        assert_eq!(handle.with(|n| n.value).unwrap(), 9);

        other.release();
        assert_eq!(native::ref_count(id), Some(1));
        drop(handle);
        assert!(!native::is_alive(id));
    }

    #[test]
    fn test_floating_keep_and_claim() {
        let floating = Handle::new_floating(Node::default());
        let id = floating.id().unwrap();
        assert!(floating.is_floating());
        assert_eq!(native::ref_count(id), Some(1));

        let owned = floating.claim().unwrap();
        assert_eq!(owned.ownership(), Ownership::Owned);
        assert_eq!(native::is_floating(id), Some(false));
        assert_eq!(native::ref_count(id), Some(1));
    }

    #[test]
    fn test_sink_and_adopt_from_raw_ids() {
        let id = native::register(Node::default(), true);
        let sunk = Handle::<Node>::sink(Some(id)).unwrap();
        assert_eq!(native::is_floating(id), Some(false));
        assert_eq!(native::ref_count(id), Some(1));

        // wrapping an already claimed object takes a reference of its own
        let extra = Handle::<Node>::sink(Some(id)).unwrap();
        assert_eq!(native::ref_count(id), Some(2));
        drop(extra);
        drop(sunk);
        assert!(!native::is_alive(id));

        let floating_id = native::register(Node::default(), true);
        let borrowed = Handle::<Node>::keep_floating(Some(floating_id)).unwrap();
        assert!(borrowed.is_floating());
        assert_eq!(native::ref_count(floating_id), Some(1));
        drop(borrowed);
        assert!(!native::is_alive(floating_id));

        let owned_id = native::register(Node::default(), false);
        let adopted = Handle::<Node>::adopt(Some(owned_id)).unwrap();
        assert_eq!(native::ref_count(owned_id), Some(1));
        drop(adopted);
        assert!(!native::is_alive(owned_id));
    }

    #[test]
    fn test_dropping_floating_handle_after_foreign_sink() {
        let id = native::register(Node::default(), true);
        let floating = Handle::<Node>::keep_floating(Some(id)).unwrap();
        let owner = Handle::<Node>::sink(Some(id)).unwrap();
        assert_eq!(native::ref_count(id), Some(1));

        // the floating reference now belongs to `owner`
        drop(floating);
        assert!(native::is_alive(id));
        assert!(owner.get().is_ok());

        drop(owner);
        assert!(!native::is_alive(id));
    }

    #[test]
    fn test_claim_after_foreign_sink_takes_own_reference() {
        let id = native::register(Node::default(), true);
        let floating = Handle::<Node>::keep_floating(Some(id)).unwrap();
        let owner = Handle::<Node>::sink(Some(id)).unwrap();

        let claimed = floating.claim().unwrap();
        assert_eq!(claimed.ownership(), Ownership::Owned);
        assert_eq!(native::ref_count(id), Some(2));

        drop(claimed);
        assert!(owner.get().is_ok());
        assert_eq!(native::ref_count(id), Some(1));
        drop(owner);
        assert!(!native::is_alive(id));
    }

    #[test]
    fn test_claim_of_destroyed_object_fails() {
        let id = native::register(Node::default(), true);
        let floating = Handle::<Node>::keep_floating(Some(id)).unwrap();
        let mut owner = Handle::<Node>::sink(Some(id)).unwrap();
        owner.release();

        assert!(matches!(floating.claim(), Err(Error::Released { .. })));
    }

    #[test]
    fn test_forced_floating_object_is_claimed_without_new_reference() {
        let id = native::register(Node::default(), false);
        assert!(native::force_floating(id));

        let handle = Handle::<Node>::sink(Some(id)).unwrap();
        assert_eq!(native::is_floating(id), Some(false));
        assert_eq!(native::ref_count(id), Some(1));
        drop(handle);
        assert!(!native::is_alive(id));
    }

    #[test]
    fn test_null_and_foreign_ids_give_no_handle() {
        assert!(Handle::<Node>::adopt(None).is_none());
        assert!(Handle::<Node>::sink(None).is_none());

        let id = native::register(5u64, false);
        assert!(Handle::<Node>::sink(Some(id)).is_none());
        native::unref(id);
        assert!(Handle::<u64>::sink(Some(id)).is_none());
    }

    #[test]
    fn test_scoped_release() {
        let handle = Handle::new(Node { value: 1, ..Default::default() });
        let id = handle.id().unwrap();
        let value = Handle::scoped(handle, |h| h.with(|n| n.value + 1).unwrap());
        assert_eq!(value, 2);
        assert!(!native::is_alive(id));
    }

    #[test]
    fn test_release_cascades_to_children() {
        let child = Handle::new(Node::default());
        let child_id = child.id().unwrap();
        let parent = Handle::new(Node {
            value: 0,
            children: vec![child.clone()],
        });
        drop(child);
        assert_eq!(native::ref_count(child_id), Some(1));

        drop(parent);
        assert!(!native::is_alive(child_id));
    }
}
