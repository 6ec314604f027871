/// Handle registries and ownership validation
///
/// A [`Registry`] maps typed handles to shared entities. The map itself sits
/// behind a `std::sync::Mutex` that is only held while the map is read or
/// modified, never across I/O; entities carry their own locks.
///
/// Every entry records the connection that owns it. Lookups of child handles
/// (transactions, statements, cursors) go through [`Registry::resolve_owned`],
/// which rejects a caller presenting a different connection id. When a
/// connection closes, its children are orphaned: the entity is dropped so its
/// libsql resources are released, and a tombstone remains so the next use
/// reports `OwnerClosed` instead of a misleading not-found. Tombstones are
/// capped per registry; past the cap the oldest are forgotten and their
/// handles report `NotFound`.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::constants::MAX_ORPHANED_HANDLES;
use crate::error::BridgeError;
use crate::handle::{ConnectionId, Handle};

/// Safely lock a mutex with proper error handling
///
/// Returns a descriptive error if the mutex is poisoned.
pub fn safe_lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> Result<MutexGuard<'a, T>, BridgeError> {
    mutex
        .lock()
        .map_err(|e| BridgeError::Runtime(format!("Mutex poisoned in {context}: {e}")))
}

enum Slot<T> {
    Live { owner: ConnectionId, entity: Arc<T> },
    Orphaned { owner: ConnectionId },
}

impl<T> Slot<T> {
    fn owner(&self) -> ConnectionId {
        match self {
            Slot::Live { owner, .. } | Slot::Orphaned { owner } => *owner,
        }
    }
}

struct Slots<K, T> {
    map: HashMap<K, Slot<T>>,
    /// Orphaned handles, oldest first.
    orphans: VecDeque<K>,
}

impl<K: Handle, T> Slots<K, T> {
    fn take(&mut self, id: &K) -> Option<Arc<T>> {
        match self.map.remove(id)? {
            Slot::Live { entity, .. } => Some(entity),
            Slot::Orphaned { .. } => {
                self.orphans.retain(|orphan| orphan != id);
                None
            }
        }
    }
}

pub struct Registry<K: Handle, T> {
    slots: Mutex<Slots<K, T>>,
    orphan_limit: usize,
}

impl<K: Handle, T> Default for Registry<K, T> {
    fn default() -> Self {
        Self::with_orphan_limit(MAX_ORPHANED_HANDLES)
    }
}

impl<K: Handle, T> Registry<K, T> {
    /// A registry keeping at most `orphan_limit` tombstones.
    pub fn with_orphan_limit(orphan_limit: usize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                orphans: VecDeque::new(),
            }),
            orphan_limit,
        }
    }

    fn slots(&self, context: &str) -> Result<MutexGuard<'_, Slots<K, T>>, BridgeError> {
        safe_lock(&self.slots, context)
    }

    /// Store an entity under a freshly allocated handle.
    pub fn insert(&self, owner: ConnectionId, entity: Arc<T>) -> Result<K, BridgeError> {
        let id = K::allocate();
        self.insert_with_id(id, owner, entity)?;
        Ok(id)
    }

    /// Store an entity under a handle allocated by the caller.
    pub fn insert_with_id(&self, id: K, owner: ConnectionId, entity: Arc<T>) -> Result<(), BridgeError> {
        self.slots("registry insert")?
            .map
            .insert(id, Slot::Live { owner, entity });
        Ok(())
    }

    /// Resolve a handle without an ownership check.
    pub fn resolve(&self, id: &K) -> Result<Arc<T>, BridgeError> {
        match self.slots("registry resolve")?.map.get(id) {
            Some(Slot::Live { entity, .. }) => Ok(entity.clone()),
            Some(Slot::Orphaned { .. }) => Err(BridgeError::owner_closed(id)),
            None => Err(BridgeError::unknown_handle(K::KIND, id)),
        }
    }

    /// Resolve a child handle on behalf of `caller`.
    ///
    /// Fails with `NotFound` for unknown handles, `OwnerMismatch` when the
    /// handle belongs to another connection and `OwnerClosed` when its
    /// connection has been closed.
    pub fn resolve_owned(&self, id: &K, caller: &ConnectionId) -> Result<Arc<T>, BridgeError> {
        let slots = self.slots("registry resolve_owned")?;
        let slot = slots
            .map
            .get(id)
            .ok_or_else(|| BridgeError::unknown_handle(K::KIND, id))?;
        verify_owner(id, slot.owner(), caller)?;
        match slot {
            Slot::Live { entity, .. } => Ok(entity.clone()),
            Slot::Orphaned { .. } => Err(BridgeError::owner_closed(id)),
        }
    }

    /// Remove a handle, returning the entity if it was still live.
    ///
    /// Removing an unknown or orphaned handle is not an error.
    pub fn remove(&self, id: &K) -> Result<Option<Arc<T>>, BridgeError> {
        Ok(self.slots("registry remove")?.take(id))
    }

    /// Remove a child handle on behalf of `caller`.
    ///
    /// A handle owned by another connection is left in place and rejected
    /// with `OwnerMismatch`; unknown handles are a no-op.
    pub fn remove_owned(&self, id: &K, caller: &ConnectionId) -> Result<Option<Arc<T>>, BridgeError> {
        let mut slots = self.slots("registry remove_owned")?;
        if let Some(slot) = slots.map.get(id) {
            verify_owner(id, slot.owner(), caller)?;
        }
        Ok(slots.take(id))
    }

    /// Turn every live entry owned by `owner` into a tombstone.
    ///
    /// Returns the detached entities so the caller controls when they drop.
    pub fn orphan_owned_by(&self, owner: &ConnectionId) -> Result<Vec<Arc<T>>, BridgeError> {
        let mut slots = self.slots("registry orphan_owned_by")?;
        let Slots { map, orphans } = &mut *slots;

        let mut detached = Vec::new();
        for (id, slot) in map.iter_mut() {
            if slot.owner() != *owner {
                continue;
            }
            if let Slot::Live { entity, .. } =
                std::mem::replace(slot, Slot::Orphaned { owner: *owner })
            {
                detached.push(entity);
                orphans.push_back(*id);
            }
        }

        while orphans.len() > self.orphan_limit {
            if let Some(oldest) = orphans.pop_front() {
                map.remove(&oldest);
            }
        }
        Ok(detached)
    }

    /// Whether `id` refers to a live entity.
    pub fn contains(&self, id: &K) -> Result<bool, BridgeError> {
        Ok(matches!(
            self.slots("registry contains")?.map.get(id),
            Some(Slot::Live { .. })
        ))
    }

    /// Number of live entities.
    pub fn len(&self) -> Result<usize, BridgeError> {
        Ok(self
            .slots("registry len")?
            .map
            .values()
            .filter(|slot| matches!(slot, Slot::Live { .. }))
            .count())
    }

    pub fn is_empty(&self) -> Result<bool, BridgeError> {
        Ok(self.len()? == 0)
    }

    /// Number of tombstones currently kept.
    pub fn orphaned(&self) -> Result<usize, BridgeError> {
        Ok(self.slots("registry orphaned")?.orphans.len())
    }
}

/// The ownership rule shared by every child registry.
pub fn verify_owner(
    handle: &impl std::fmt::Display,
    owner: ConnectionId,
    caller: &ConnectionId,
) -> Result<(), BridgeError> {
    if owner != *caller {
        return Err(BridgeError::owner_mismatch(handle));
    }
    Ok(())
}
