//! Live connection set for a broadcast server.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::connection::{ConnectionHandle, ConnectionId};

/// Tracks which connections are currently up.
///
/// A handle is present iff the runtime reported it connected and has not yet
/// reported it disconnected. Connection tasks run on a multi-threaded
/// runtime, so the map sits behind a lock that is held for the whole of each
/// operation, `for_each` included.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected handle.
    ///
    /// Registering the same id twice is a logic error: it panics in debug
    /// builds and overwrites the previous entry in release builds.
    pub fn on_connect(&self, handle: ConnectionHandle) {
        let id = handle.id();
        let previous = self.lock().insert(id, handle);
        debug_assert!(previous.is_none(), "connection {id} registered twice");
    }

    /// Forget a handle. Unknown ids are ignored.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Visit every live handle. Order is unspecified.
    ///
    /// `visit` runs with the registry locked, so it must not call back into
    /// the registry.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&ConnectionHandle),
    {
        for handle in self.lock().values() {
            visit(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic elsewhere can't leave the map half-updated, so a poisoned lock
    // is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::connection::test_support::fake_connection;

    fn visited(registry: &ConnectionRegistry) -> BTreeSet<ConnectionId> {
        let mut ids = BTreeSet::new();
        registry.for_each(|handle| {
            ids.insert(handle.id());
        });
        ids
    }

    #[test]
    fn for_each_visits_connected_handles() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = fake_connection(1);
        let (b, _rx_b) = fake_connection(2);
        registry.on_connect(a.clone());
        registry.on_connect(b.clone());

        assert_eq!(visited(&registry), BTreeSet::from([a.id(), b.id()]));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn disconnect_removes_and_tolerates_repeats() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = fake_connection(1);
        registry.on_connect(a.clone());

        assert!(registry.on_disconnect(a.id()));
        assert!(!registry.on_disconnect(a.id()));
        assert!(registry.is_empty());
        assert!(visited(&registry).is_empty());
    }

    #[test]
    fn interleaved_events_leave_only_latest_connected() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (1..=5).map(fake_connection).collect();

        for (handle, _) in &handles {
            registry.on_connect(handle.clone());
        }
        registry.on_disconnect(handles[1].0.id());
        registry.on_disconnect(handles[3].0.id());
        registry.on_connect(handles[1].0.clone());
        registry.on_disconnect(handles[4].0.id());

        let expected = BTreeSet::from([handles[0].0.id(), handles[1].0.id(), handles[2].0.id()]);
        assert_eq!(visited(&registry), expected);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_connect_panics_in_debug() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = fake_connection(1);
        registry.on_connect(a.clone());
        registry.on_connect(a);
    }
}
