//! Per-connection scheduling state and the connection table.
//!
//! A connection owns its register file, its user value and its binding to
//! a named program. Binding changes take a per-connection lock so they are
//! ordered with close; the decision path only ever loads the binding.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use mpsched_core::ConnectionId;
use mpsched_runtime::Registry;

use crate::error::{ControlError, ControlResult};
use crate::registers::RegisterFile;

/// Where a connection is in its decision cycle.
///
/// ```text
/// Idle → Evaluating → Decided → Applied
///   ↑        │                     │
///   └────────┴─(no subflows)───────┘ (next opportunity)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DecisionPhase {
    Idle = 0,
    Evaluating = 1,
    Decided = 2,
    Applied = 3,
}

impl DecisionPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => DecisionPhase::Evaluating,
            2 => DecisionPhase::Decided,
            3 => DecisionPhase::Applied,
            _ => DecisionPhase::Idle,
        }
    }
}

pub struct Connection {
    id: ConnectionId,
    multipath: bool,
    registers: RegisterFile,
    user: AtomicI64,
    binding: ArcSwapOption<String>,
    /// Guards binding changes; `true` once the connection is closed.
    closed: Mutex<bool>,
    phase: AtomicU8,
    /// Sequence number of the last decision handed out.
    seq: AtomicU64,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, multipath: bool, register_count: u8) -> Self {
        Self {
            id,
            multipath,
            registers: RegisterFile::new(register_count),
            user: AtomicI64::new(0),
            binding: ArcSwapOption::empty(),
            closed: Mutex::new(false),
            phase: AtomicU8::new(DecisionPhase::Idle as u8),
            seq: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_multipath(&self) -> bool {
        self.multipath
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn user(&self) -> i64 {
        self.user.load(Ordering::Acquire)
    }

    pub fn set_user(&self, value: i64) {
        self.user.store(value, Ordering::Release);
    }

    /// Name of the bound program, if any.
    pub fn bound_scheduler(&self) -> Option<Arc<String>> {
        self.binding.load_full()
    }

    pub fn phase(&self) -> DecisionPhase {
        DecisionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    // ── Binding ────────────────────────────────────────────────────

    /// Bind to `name`, releasing any previous binding. Rebinding to the
    /// same name is a no-op.
    pub(crate) fn bind(&self, registry: &Registry, name: &str) -> ControlResult<()> {
        let closed = self.closed.lock();
        if *closed {
            return Err(ControlError::ConnectionNotFound(self.id));
        }
        let current = self.binding.load_full();
        if current.as_deref().map(String::as_str) == Some(name) {
            return Ok(());
        }

        registry.acquire(name)?;
        self.binding.store(Some(Arc::new(name.to_string())));
        if let Some(previous) = current {
            registry.release(&previous);
        }
        info!(connection = %self.id, scheduler = %name, "scheduler bound");
        Ok(())
    }

    /// Drop the binding, if any. The connection falls back to the
    /// built-in heuristic from its next opportunity.
    pub(crate) fn unbind(&self, registry: &Registry) -> ControlResult<()> {
        let closed = self.closed.lock();
        if *closed {
            return Err(ControlError::ConnectionNotFound(self.id));
        }
        self.release_binding(registry);
        Ok(())
    }

    /// Mark closed and release the binding. Idempotent.
    pub(crate) fn close(&self, registry: &Registry) {
        let mut closed = self.closed.lock();
        if *closed {
            return;
        }
        *closed = true;
        self.release_binding(registry);
    }

    fn release_binding(&self, registry: &Registry) {
        if let Some(previous) = self.binding.swap(None) {
            registry.release(&previous);
            info!(connection = %self.id, scheduler = %previous, "scheduler unbound");
        }
    }

    // ── Decision cycle ─────────────────────────────────────────────

    pub(crate) fn begin_evaluation(&self) {
        self.phase
            .store(DecisionPhase::Evaluating as u8, Ordering::Release);
    }

    /// Record a produced decision and return its sequence number.
    pub(crate) fn finish_decided(&self) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.phase.store(DecisionPhase::Decided as u8, Ordering::Release);
        seq
    }

    pub(crate) fn finish_idle(&self) {
        self.phase.store(DecisionPhase::Idle as u8, Ordering::Release);
    }

    /// The transport applied decision `seq`. Returns false for a stale or
    /// unknown sequence number; acknowledging twice is harmless.
    pub fn acknowledge(&self, seq: u64) -> bool {
        if seq == 0 || self.seq.load(Ordering::Acquire) != seq {
            return false;
        }
        let applied = self
            .phase
            .compare_exchange(
                DecisionPhase::Decided as u8,
                DecisionPhase::Applied as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        applied || self.phase() == DecisionPhase::Applied
    }
}

// ── Connection table ───────────────────────────────────────────────

/// Every open connection, keyed by id.
pub struct ConnectionTable {
    next_id: AtomicU64,
    register_count: u8,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionTable {
    pub fn new(register_count: u8) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            register_count,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate an id and register a fresh, unbound connection.
    pub fn open(&self, multipath: bool) -> Arc<Connection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(id, multipath, self.register_count));
        self.connections.write().insert(id, conn.clone());
        debug!(connection = %id, multipath, "connection opened");
        conn
    }

    pub fn get(&self, id: ConnectionId) -> ControlResult<Arc<Connection>> {
        self.connections
            .read()
            .get(&id)
            .cloned()
            .ok_or(ControlError::ConnectionNotFound(id))
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().remove(&id)
    }

    /// Remove and return every connection.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.write().drain().map(|(_, c)| c).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpsched_core::ReloadPolicy;
    use mpsched_lang::CompileOptions;

    fn registry_with(names: &[&str]) -> Registry {
        let reg = Registry::new(CompileOptions::default(), ReloadPolicy::Reject);
        for name in names {
            reg.load(&format!("SCHEDULER {name}; FALLBACK;")).unwrap();
        }
        reg
    }

    #[test]
    fn table_allocates_distinct_ids() {
        let table = ConnectionTable::new(6);
        let a = table.open(true);
        let b = table.open(false);
        assert_ne!(a.id(), b.id());
        assert_eq!(table.len(), 2);
        assert!(table.get(b.id()).is_ok());
        assert!(!table.get(b.id()).unwrap().is_multipath());
    }

    #[test]
    fn unknown_connection_is_an_error() {
        let table = ConnectionTable::new(6);
        assert_eq!(
            table.get(ConnectionId(99)).err(),
            Some(ControlError::ConnectionNotFound(ConnectionId(99)))
        );
    }

    #[test]
    fn bind_moves_reference_between_programs() {
        let reg = registry_with(&["a", "b"]);
        let conn = Connection::new(ConnectionId(1), true, 6);

        conn.bind(&reg, "a").unwrap();
        assert_eq!(reg.bound_count("a"), Some(1));

        conn.bind(&reg, "a").unwrap();
        assert_eq!(reg.bound_count("a"), Some(1));

        conn.bind(&reg, "b").unwrap();
        assert_eq!(reg.bound_count("a"), Some(0));
        assert_eq!(reg.bound_count("b"), Some(1));
        assert_eq!(conn.bound_scheduler().as_deref().map(String::as_str), Some("b"));
    }

    #[test]
    fn failed_bind_keeps_previous_binding() {
        let reg = registry_with(&["a"]);
        let conn = Connection::new(ConnectionId(1), true, 6);
        conn.bind(&reg, "a").unwrap();

        let err = conn.bind(&reg, "missing").unwrap_err();
        assert_eq!(err, ControlError::SchedulerNotFound("missing".into()));
        assert_eq!(reg.bound_count("a"), Some(1));
    }

    #[test]
    fn close_releases_binding_and_blocks_rebind() {
        let reg = registry_with(&["a"]);
        let conn = Connection::new(ConnectionId(3), true, 6);
        conn.bind(&reg, "a").unwrap();

        conn.close(&reg);
        conn.close(&reg);
        assert_eq!(reg.bound_count("a"), Some(0));
        assert!(conn.bound_scheduler().is_none());
        assert_eq!(
            conn.bind(&reg, "a"),
            Err(ControlError::ConnectionNotFound(ConnectionId(3)))
        );
    }

    #[test]
    fn decision_cycle_and_acknowledge() {
        let conn = Connection::new(ConnectionId(1), true, 6);
        assert_eq!(conn.phase(), DecisionPhase::Idle);

        conn.begin_evaluation();
        assert_eq!(conn.phase(), DecisionPhase::Evaluating);
        let seq = conn.finish_decided();
        assert_eq!(seq, 1);
        assert_eq!(conn.phase(), DecisionPhase::Decided);

        assert!(!conn.acknowledge(seq + 1));
        assert!(conn.acknowledge(seq));
        assert!(conn.acknowledge(seq));
        assert_eq!(conn.phase(), DecisionPhase::Applied);

        conn.begin_evaluation();
        let next = conn.finish_decided();
        assert_eq!(next, 2);
        assert!(!conn.acknowledge(seq));

        conn.begin_evaluation();
        conn.finish_idle();
        assert_eq!(conn.phase(), DecisionPhase::Idle);
    }
}
