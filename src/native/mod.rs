//! Native object model.
//!
//! A process-wide registry of reference-counted objects. Each object carries a
//! type name, a reference count and a "floating" flag: a freshly created
//! floating object holds one reference that nobody has claimed yet. The first
//! owner claims it with [`ref_sink`]; everyone else takes a reference of their
//! own with [`ref_`]. When the count reaches zero the object's value is
//! dropped.
//!
//! Callers never touch the registry directly; they go through [`Handle`],
//! which owns exactly one reference and gives it back exactly once.
//!
//! Ids carry a generation, so an id that outlived its object can never
//! address whatever later reuses the slot.

mod handle;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

pub use handle::{Handle, Ownership};

/// Address of a registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

struct Entry {
    type_name: &'static str,
    refcount: usize,
    floating: bool,
    value: Arc<dyn Any + Send + Sync>,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Registry {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn entry(&self, id: ObjectId) -> Option<&Entry> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut Entry> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// short type name used in diagnostics, e.g. `TreeNode`
pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Register `value` with a reference count of one.
///
/// With `floating` set the initial reference is unclaimed and must be taken
/// over with [`ref_sink`] (or dropped with [`unref`]).
pub fn register<T: Send + 'static>(value: T, floating: bool) -> ObjectId {
    let entry = Entry {
        type_name: short_type_name::<T>(),
        refcount: 1,
        floating,
        value: Arc::new(Mutex::new(value)),
    };

    let mut registry = REGISTRY.lock();
    let reusable = registry.free.pop();
    let id = match reusable {
        Some(index) => {
            let slot = &mut registry.slots[index as usize];
            slot.entry = Some(entry);
            ObjectId {
                index,
                generation: slot.generation,
            }
        }
        None => {
            let index = registry.slots.len() as u32;
            registry.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            ObjectId { index, generation: 0 }
        }
    };
    drop(registry);
    trace!(object = %id, floating, "registered native object");
    id
}

/// Add a reference. Returns `false` if the object is gone.
pub fn ref_(id: ObjectId) -> bool {
    match REGISTRY.lock().entry_mut(id) {
        Some(entry) => {
            entry.refcount += 1;
            true
        }
        None => false,
    }
}

/// Drop a reference, destroying the object when none remain.
///
/// Returns the remaining count, or `None` if the object was already gone.
/// The value is dropped after the registry lock is released, so destructors
/// may release references of their own.
pub fn unref(id: ObjectId) -> Option<usize> {
    drop_reference(id, false)
}

/// Give back the floating reference if the object still has one.
///
/// Returns `None` if the object is gone or was sunk in the meantime; the
/// reference then belongs to whoever sank it.
pub fn unref_floating(id: ObjectId) -> Option<usize> {
    drop_reference(id, true)
}

fn drop_reference(id: ObjectId, floating_only: bool) -> Option<usize> {
    let removed = {
        let mut registry = REGISTRY.lock();
        let entry = registry.entry_mut(id)?;
        if floating_only {
            if !entry.floating {
                return None;
            }
            entry.floating = false;
        }
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return Some(entry.refcount);
        }
        let slot = &mut registry.slots[id.index as usize];
        let removed = slot.entry.take();
        slot.generation = slot.generation.wrapping_add(1);
        registry.free.push(id.index);
        removed
    };
    if let Some(entry) = removed {
        trace!(object = %id, type_name = entry.type_name, "destroyed native object");
        drop(entry);
    }
    Some(0)
}

/// Claim a floating reference, or add a new one if the object is not
/// floating. Returns `false` if the object is gone.
pub fn ref_sink(id: ObjectId) -> bool {
    match REGISTRY.lock().entry_mut(id) {
        Some(entry) if entry.floating => {
            entry.floating = false;
            true
        }
        Some(entry) => {
            entry.refcount += 1;
            true
        }
        None => false,
    }
}

/// Mark the object floating again, e.g. before handing it to a call that
/// will sink it.
pub fn force_floating(id: ObjectId) -> bool {
    match REGISTRY.lock().entry_mut(id) {
        Some(entry) => {
            entry.floating = true;
            true
        }
        None => false,
    }
}

pub fn is_floating(id: ObjectId) -> Option<bool> {
    REGISTRY.lock().entry(id).map(|entry| entry.floating)
}

pub fn ref_count(id: ObjectId) -> Option<usize> {
    REGISTRY.lock().entry(id).map(|entry| entry.refcount)
}

pub fn is_alive(id: ObjectId) -> bool {
    REGISTRY.lock().entry(id).is_some()
}

/// The registered type name of a live object.
pub fn type_name(id: ObjectId) -> Option<&'static str> {
    REGISTRY.lock().entry(id).map(|entry| entry.type_name)
}

/// Shared access to the object's cell, if it is alive and holds a `T`.
pub(crate) fn get<T: Send + 'static>(id: ObjectId) -> Option<Arc<Mutex<T>>> {
    let value = REGISTRY.lock().entry(id)?.value.clone();
    value.downcast::<Mutex<T>>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_refcount_lifecycle() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let id = register(DropFlag(dropped.clone()), false);

        assert_eq!(ref_count(id), Some(1));
        assert!(ref_(id));
        assert_eq!(unref(id), Some(1));
        assert!(!dropped.load(std::sync::atomic::Ordering::SeqCst));

        assert_eq!(unref(id), Some(0));
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!is_alive(id));

        // the id is dead for good
        assert!(!ref_(id));
        assert_eq!(unref(id), None);
    }

    #[test]
    fn test_sink_claims_floating_reference() {
        let id = register(7u32, true);
        assert_eq!(is_floating(id), Some(true));

        assert!(ref_sink(id));
        assert_eq!(is_floating(id), Some(false));
        assert_eq!(ref_count(id), Some(1));

        // sinking a non-floating object takes a new reference
        assert!(ref_sink(id));
        assert_eq!(ref_count(id), Some(2));

        unref(id);
        unref(id);
        assert!(!is_alive(id));
    }

    #[test]
    fn test_stale_id_does_not_reach_reused_slot() {
        let first = register(1u8, false);
        unref(first);
        let second = register(2u8, false);

        assert!(!is_alive(first));
        assert!(get::<u8>(first).is_none());
        assert_eq!(*get::<u8>(second).unwrap().lock(), 2);
        unref(second);
    }

    #[test]
    fn test_type_name_and_downcast() {
        let id = register(String::from("tree"), false);
        assert_eq!(type_name(id), Some("String"));
        assert!(get::<u32>(id).is_none());
        assert_eq!(get::<String>(id).unwrap().lock().as_str(), "tree");
        unref(id);
    }
}
