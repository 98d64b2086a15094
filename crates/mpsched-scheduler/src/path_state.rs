//! Subflow snapshots supplied by the transport layer.
//!
//! The engine never measures paths itself; it asks a [`PathState`] for the
//! active subflows of a connection at each scheduling opportunity.

use std::collections::HashMap;

use parking_lot::RwLock;

use mpsched_core::{ConnectionId, Subflow, SubflowId};

/// Source of per-connection subflow measurements.
pub trait PathState: Send + Sync {
    /// Subflows currently able to carry data. Order does not matter.
    fn list_active_subflows(&self, connection: ConnectionId) -> Vec<Subflow>;
}

impl<F> PathState for F
where
    F: Fn(ConnectionId) -> Vec<Subflow> + Send + Sync,
{
    fn list_active_subflows(&self, connection: ConnectionId) -> Vec<Subflow> {
        self(connection)
    }
}

/// In-memory path state, updated by whoever owns the measurements.
///
/// Used by the simulator and tests; a transport integration would
/// implement [`PathState`] over its own subflow table instead.
#[derive(Default)]
pub struct StaticPathState {
    paths: RwLock<HashMap<ConnectionId, Vec<Subflow>>>,
}

impl StaticPathState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every subflow of `connection`.
    pub fn update(&self, connection: ConnectionId, subflows: Vec<Subflow>) {
        self.paths.write().insert(connection, subflows);
    }

    /// Flip one subflow's active flag. Returns false if it is unknown.
    pub fn set_active(&self, connection: ConnectionId, id: SubflowId, active: bool) -> bool {
        let mut paths = self.paths.write();
        let Some(sbf) = paths
            .get_mut(&connection)
            .and_then(|subflows| subflows.iter_mut().find(|s| s.id == id))
        else {
            return false;
        };
        sbf.active = active;
        true
    }

    pub fn forget(&self, connection: ConnectionId) {
        self.paths.write().remove(&connection);
    }
}

impl PathState for StaticPathState {
    fn list_active_subflows(&self, connection: ConnectionId) -> Vec<Subflow> {
        self.paths
            .read()
            .get(&connection)
            .map(|subflows| subflows.iter().filter(|s| s.active).cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_connection_has_no_subflows() {
        let state = StaticPathState::new();
        assert!(state.list_active_subflows(ConnectionId(1)).is_empty());
    }

    #[test]
    fn inactive_subflows_are_hidden() {
        let state = StaticPathState::new();
        let conn = ConnectionId(1);
        state.update(
            conn,
            vec![
                Subflow::new(1, 10_000, 10, 1_000),
                Subflow::new(2, 20_000, 10, 2_000),
            ],
        );
        assert!(state.set_active(conn, 1, false));
        assert!(!state.set_active(conn, 9, false));

        let ids: Vec<_> = state
            .list_active_subflows(conn)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![2]);

        state.forget(conn);
        assert!(state.list_active_subflows(conn).is_empty());
    }

    #[test]
    fn closures_are_path_state() {
        let state = |_: ConnectionId| vec![Subflow::new(4, 1, 1, 1)];
        assert_eq!(state.list_active_subflows(ConnectionId(7))[0].id, 4);
    }
}
