//! The control API: one runtime owning the registry, every connection and
//! the decision engine.
//!
//! Control-plane calls return typed errors. The decision path
//! ([`SchedulerRuntime::evaluate`]) never fails; it only reports "no
//! decision" when a connection has nothing to send on.

use std::sync::Arc;

use tracing::{info, warn};

use mpsched_core::{ConfigError, ConnectionId, EngineConfig, RegisterIndex};
use mpsched_lang::CompileOptions;
use mpsched_runtime::{ProgramHandle, Registry};

use crate::connection::{ConnectionTable, DecisionPhase};
use crate::diagnostics::Diagnostics;
use crate::engine::{DecisionEngine, DecisionTicket};
use crate::error::{ControlError, ControlResult};
use crate::path_state::PathState;

pub struct SchedulerRuntime {
    config: Arc<EngineConfig>,
    registry: Arc<Registry>,
    connections: ConnectionTable,
    engine: DecisionEngine,
}

impl SchedulerRuntime {
    /// Validate `config` and build an empty runtime.
    pub fn new(config: EngineConfig, path_state: Arc<dyn PathState>) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new(
            CompileOptions::from(&config.limits),
            config.policy.reload,
        ));
        let engine = DecisionEngine::new(config.clone(), registry.clone(), path_state);

        info!(
            registers = config.limits.register_count,
            step_budget = config.limits.step_budget,
            max_instructions = config.limits.max_instructions,
            reload = ?config.policy.reload,
            "scheduler runtime ready"
        );

        Ok(Self {
            connections: ConnectionTable::new(config.limits.register_count),
            config,
            registry,
            engine,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.engine.diagnostics()
    }

    // ── Programs ───────────────────────────────────────────────────

    /// Compile, validate and register a program under its declared name.
    pub fn load_scheduler(&self, source: &str) -> ControlResult<ProgramHandle> {
        self.registry.load(source).map_err(|e| {
            warn!(error = %e, "scheduler load rejected");
            ControlError::from(e)
        })
    }

    /// Remove a program no connection is bound to.
    pub fn remove_scheduler(&self, name: &str) -> ControlResult<()> {
        Ok(self.registry.remove(name)?)
    }

    /// Sorted names of every loaded program.
    pub fn schedulers(&self) -> Vec<String> {
        self.registry.names()
    }

    // ── Connections ────────────────────────────────────────────────

    /// Register a new connection. Called by the transport on establishment.
    pub fn open_connection(&self, multipath: bool) -> ConnectionId {
        self.connections.open(multipath).id()
    }

    /// Release the connection's binding and forget it.
    pub fn close_connection(&self, id: ConnectionId) -> ControlResult<()> {
        let conn = self
            .connections
            .remove(id)
            .ok_or(ControlError::ConnectionNotFound(id))?;
        conn.close(&self.registry);
        info!(connection = %id, "connection closed");
        Ok(())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Bind `id` to the program `name`; takes effect at the next opportunity.
    pub fn set_scheduler(&self, id: ConnectionId, name: &str) -> ControlResult<()> {
        let conn = self.connections.get(id)?;
        if !conn.is_multipath() {
            return Err(ControlError::NoMultipathCapability(id));
        }
        conn.bind(&self.registry, name)
    }

    /// Revert `id` to the built-in heuristic.
    pub fn clear_scheduler(&self, id: ConnectionId) -> ControlResult<()> {
        self.connections.get(id)?.unbind(&self.registry)
    }

    /// Name of the program bound to `id`, if any.
    pub fn scheduler_of(&self, id: ConnectionId) -> ControlResult<Option<String>> {
        Ok(self
            .connections
            .get(id)?
            .bound_scheduler()
            .map(|name| name.to_string()))
    }

    pub fn set_register(&self, id: ConnectionId, index: RegisterIndex, value: i64) -> ControlResult<()> {
        self.connections.get(id)?.registers().set(index, value)
    }

    pub fn get_register(&self, id: ConnectionId, index: RegisterIndex) -> ControlResult<i64> {
        self.connections.get(id)?.registers().get(index)
    }

    pub fn set_user(&self, id: ConnectionId, value: i64) -> ControlResult<()> {
        self.connections.get(id)?.set_user(value);
        Ok(())
    }

    pub fn phase(&self, id: ConnectionId) -> ControlResult<DecisionPhase> {
        Ok(self.connections.get(id)?.phase())
    }

    // ── Decision path ──────────────────────────────────────────────

    /// Decide for one scheduling opportunity. `None` if the connection is
    /// unknown or has no active subflow.
    pub fn evaluate(&self, id: ConnectionId) -> Option<DecisionTicket> {
        let conn = self.connections.get(id).ok()?;
        self.engine.evaluate(&conn)
    }

    /// The transport applied decision `seq` on `id`.
    pub fn acknowledge(&self, id: ConnectionId, seq: u64) -> bool {
        self.connections
            .get(id)
            .map(|conn| conn.acknowledge(seq))
            .unwrap_or(false)
    }

    /// Close every connection and drop every program.
    pub fn shutdown(&self) {
        let connections = self.connections.drain();
        let closed = connections.len();
        for conn in connections {
            conn.close(&self.registry);
        }
        let dropped = self.registry.clear();
        info!(closed, dropped, "scheduler runtime shut down");
    }
}
