//! The set of participants currently eligible to receive broadcasts.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    connection::{Connection, ConnectionId},
    error::RegistryError,
};

/// Thread-safe membership of live connections.
///
/// Every mutation and every snapshot goes through the same mutex, and the
/// lock is never held across an `.await`: broadcasts copy the membership out
/// with [`snapshot`](Self::snapshot) and send without holding it.
///
/// `BTreeMap` keyed by the monotonically allocated id keeps snapshots in
/// registration order.
#[derive(Default)]
pub struct Registry {
    members: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut members = self.lock();
        let id = conn.id();
        if members.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        members.insert(id, conn);
        Ok(())
    }

    /// Removes `id` and retires the connection.
    ///
    /// Removing an absent id is a no-op returning `None`, so a failed-send
    /// cleanup racing a disconnect cleanup removes the connection once.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.lock().remove(&id)?;
        removed.retire();
        Some(removed)
    }

    /// Point-in-time copy of the membership, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Critical sections only insert, remove or clone, so a panic elsewhere
    // cannot leave the map half-updated.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Arc<Connection>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
