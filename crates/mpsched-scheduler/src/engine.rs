//! Decision engine: one scheduling opportunity, start to finish.
//!
//! ```text
//! evaluate(conn)
//!   1. resolve binding      → program or fallback reason
//!   2. snapshot             → registers, user, active subflows (sorted by id)
//!   3. pre-filter           → subflow cap register truncates candidates
//!   4. execute              → vm::execute under the step budget
//!   5. fall back            → heuristic picked by the mode register
//!   6. post-filter          → bandwidth floor/ceiling on weighted decisions
//!   7. emit                 → DecisionTicket { seq, decision, origin }
//! ```
//!
//! Nothing on this path returns an error to the transport: every failure
//! degrades to a heuristic decision. The only non-decision is "no active
//! subflows".

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use mpsched_core::{Decision, EngineConfig, RegisterIndex, Subflow, SubflowId};
use mpsched_runtime::{EvalContext, Evaluation, Fault, Outcome, Registry, execute};

use crate::connection::Connection;
use crate::diagnostics::Diagnostics;
use crate::heuristics::{self, FallbackMode};
use crate::path_state::PathState;
use crate::shaping::{self, BandwidthBounds};

/// Why a heuristic decided instead of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No scheduler is bound to the connection.
    Unbound,
    /// The bound scheduler was removed from the registry.
    ProgramMissing,
    /// The program executed `FALLBACK`.
    Deferred,
    /// The program ran out of steps.
    BudgetExceeded,
    /// The program faulted (division by zero, bad index, empty weights).
    Fault,
}

/// Who produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "source", content = "reason", rename_all = "snake_case")]
pub enum DecisionOrigin {
    Program,
    Heuristic(FallbackReason),
}

/// A decision handed to the transport, to be acknowledged by `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionTicket {
    pub seq: u64,
    pub decision: Decision,
    pub origin: DecisionOrigin,
    /// Instructions the program executed (0 when no program ran).
    pub steps: u64,
}

pub struct DecisionEngine {
    config: Arc<EngineConfig>,
    registry: Arc<Registry>,
    path_state: Arc<dyn PathState>,
    diagnostics: Diagnostics,
}

impl DecisionEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        registry: Arc<Registry>,
        path_state: Arc<dyn PathState>,
    ) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics.min_interval());
        Self {
            config,
            registry,
            path_state,
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Produce a decision for `conn`, or `None` if it has no active subflow.
    pub fn evaluate(&self, conn: &Connection) -> Option<DecisionTicket> {
        conn.begin_evaluation();
        let Some((decision, origin, steps)) = self.decide(conn) else {
            conn.finish_idle();
            debug!(connection = %conn.id(), "no active subflows, no decision");
            return None;
        };
        if matches!(origin, DecisionOrigin::Heuristic(_)) {
            self.diagnostics.fallback_used();
        }
        let seq = conn.finish_decided();
        debug!(connection = %conn.id(), seq, ?origin, steps, ?decision, "scheduling decision");
        Some(DecisionTicket {
            seq,
            decision,
            origin,
            steps,
        })
    }

    fn decide(&self, conn: &Connection) -> Option<(Decision, DecisionOrigin, u64)> {
        let limits = &self.config.limits;
        let policy = &self.config.policy;

        let program = match conn.bound_scheduler() {
            None => Err(FallbackReason::Unbound),
            Some(name) => match self.registry.lookup(&name) {
                Some(program) => Ok(program),
                None => {
                    self.diagnostics.program_missing(conn.id(), &name);
                    Err(FallbackReason::ProgramMissing)
                }
            },
        };

        let registers = conn.registers().snapshot();
        let mut candidates = self.path_state.list_active_subflows(conn.id());
        candidates.retain(|s| s.active);
        candidates.sort_by_key(|s| s.id);
        candidates.dedup_by_key(|s| s.id);
        if candidates.is_empty() {
            return None;
        }

        let read = |index: Option<RegisterIndex>| {
            index
                .and_then(|r| r.slot(limits.register_count))
                .and_then(|slot| registers.get(slot))
                .copied()
        };

        if let Some(cap) = read(policy.subflow_cap_register).filter(|&v| v > 0) {
            candidates.truncate(usize::try_from(cap).unwrap_or(usize::MAX));
        }
        let mode = FallbackMode::from_register(read(policy.mode_register).unwrap_or(0));
        let heuristic = |candidates: &[Subflow]| {
            heuristics::fallback(mode, candidates, limits.weight_total)
        };

        let (decision, origin, steps) = match program {
            Err(reason) => (heuristic(&candidates)?, DecisionOrigin::Heuristic(reason), 0),
            Ok(program) => {
                let ctx = EvalContext {
                    registers: &registers,
                    user: conn.user(),
                    candidates: &candidates,
                };
                match execute(&program, &ctx, limits.step_budget) {
                    Ok(Evaluation {
                        outcome: Outcome::Subflow(id),
                        steps,
                    }) => (Decision::Subflow { id }, DecisionOrigin::Program, steps),
                    Ok(Evaluation {
                        outcome: Outcome::Weights(raw),
                        steps,
                    }) => {
                        let raw: Vec<(SubflowId, u128)> = candidates
                            .iter()
                            .zip(raw)
                            .map(|(s, w)| (s.id, u128::from(w)))
                            .collect();
                        let weights = heuristics::quantize(&raw, limits.weight_total);
                        (Decision::Weights { weights }, DecisionOrigin::Program, steps)
                    }
                    Ok(Evaluation {
                        outcome: Outcome::Fallback,
                        steps,
                    }) => (
                        heuristic(&candidates)?,
                        DecisionOrigin::Heuristic(FallbackReason::Deferred),
                        steps,
                    ),
                    Err(Fault::BudgetExceeded { limit }) => {
                        self.diagnostics
                            .budget_exceeded(conn.id(), program.name(), limit);
                        (
                            heuristic(&candidates)?,
                            DecisionOrigin::Heuristic(FallbackReason::BudgetExceeded),
                            limit,
                        )
                    }
                    Err(fault) => {
                        self.diagnostics.fault(conn.id(), program.name(), &fault);
                        (
                            heuristic(&candidates)?,
                            DecisionOrigin::Heuristic(FallbackReason::Fault),
                            0,
                        )
                    }
                }
            }
        };

        let decision = match decision {
            Decision::Weights { weights } => {
                let bounds = BandwidthBounds::from_registers(
                    read(policy.min_bandwidth_register),
                    read(policy.max_bandwidth_register),
                );
                Decision::Weights {
                    weights: shaping::apply_bounds(weights, &candidates, bounds, limits.weight_total),
                }
            }
            single => single,
        };

        Some((decision, origin, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_state::StaticPathState;
    use mpsched_core::{ConnectionId, R1, R4, ReloadPolicy};
    use mpsched_lang::CompileOptions;

    struct Fixture {
        engine: DecisionEngine,
        registry: Arc<Registry>,
        paths: Arc<StaticPathState>,
        conn: Connection,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(EngineConfig::default());
        let registry = Arc::new(Registry::new(
            CompileOptions::from(&config.limits),
            ReloadPolicy::Reject,
        ));
        let paths = Arc::new(StaticPathState::new());
        let conn = Connection::new(ConnectionId(1), true, config.limits.register_count);
        paths.update(
            conn.id(),
            vec![
                Subflow::new(3, 30_000, 10, 1_000_000),
                Subflow::new(1, 50_000, 10, 3_000_000),
                Subflow::new(2, 10_000, 10, 4_000_000),
            ],
        );
        let engine = DecisionEngine::new(config, registry.clone(), paths.clone());
        Fixture {
            engine,
            registry,
            paths,
            conn,
        }
    }

    #[test]
    fn unbound_uses_lowest_rtt() {
        let f = fixture();
        let ticket = f.engine.evaluate(&f.conn).unwrap();
        assert_eq!(ticket.decision, Decision::Subflow { id: 2 });
        assert_eq!(ticket.origin, DecisionOrigin::Heuristic(FallbackReason::Unbound));
        assert_eq!(ticket.seq, 1);
        assert_eq!(f.engine.diagnostics().fallbacks_total(), 1);
    }

    #[test]
    fn no_subflows_no_decision() {
        let f = fixture();
        f.paths.forget(f.conn.id());
        assert!(f.engine.evaluate(&f.conn).is_none());
        assert_eq!(f.conn.last_seq(), 0);
    }

    #[test]
    fn candidates_are_sorted_by_id() {
        let f = fixture();
        f.registry.load("SCHEDULER first; EMIT SUBFLOW[0];").unwrap();
        f.conn.bind(&f.registry, "first").unwrap();
        let ticket = f.engine.evaluate(&f.conn).unwrap();
        assert_eq!(ticket.decision, Decision::Subflow { id: 1 });
        assert_eq!(ticket.origin, DecisionOrigin::Program);
    }

    #[test]
    fn inactive_and_duplicate_subflows_are_dropped() {
        let config = Arc::new(EngineConfig::default());
        let registry = Arc::new(Registry::new(CompileOptions::default(), ReloadPolicy::Reject));
        let mut stale = Subflow::new(1, 1_000, 10, 0);
        stale.active = false;
        let source = move |_: ConnectionId| {
            vec![
                stale.clone(),
                Subflow::new(4, 20_000, 10, 0),
                Subflow::new(4, 5_000, 10, 0),
                Subflow::new(2, 10_000, 10, 0),
            ]
        };
        let engine = DecisionEngine::new(config, registry.clone(), Arc::new(source));
        registry.load("SCHEDULER count; EMIT SUBFLOW[SUBFLOWS.COUNT - 1];").unwrap();
        let conn = Connection::new(ConnectionId(9), true, 6);
        conn.bind(&registry, "count").unwrap();

        let ticket = engine.evaluate(&conn).unwrap();
        assert_eq!(ticket.decision, Decision::Subflow { id: 4 });
    }

    #[test]
    fn cap_register_limits_candidates() {
        let f = fixture();
        f.conn.registers().set(R1, 2).unwrap();
        // Lowest RTT overall is 2; among {1, 2} it is still 2.
        assert_eq!(
            f.engine.evaluate(&f.conn).unwrap().decision,
            Decision::Subflow { id: 2 }
        );
        f.conn.registers().set(R1, 1).unwrap();
        assert_eq!(
            f.engine.evaluate(&f.conn).unwrap().decision,
            Decision::Subflow { id: 1 }
        );
    }

    #[test]
    fn mode_register_selects_bandwidth_weights() {
        let f = fixture();
        f.conn.registers().set(R4, 1).unwrap();
        let ticket = f.engine.evaluate(&f.conn).unwrap();
        let Decision::Weights { weights } = ticket.decision else {
            panic!("expected weights");
        };
        let pairs: Vec<_> = weights.iter().map(|w| (w.id, w.weight)).collect();
        assert_eq!(pairs, vec![(1, 375), (2, 500), (3, 125)]);
    }

    #[test]
    fn program_weights_cover_candidates() {
        let f = fixture();
        f.registry
            .load("SCHEDULER w; WEIGHT[0] = 1; WEIGHT[2] = 3; EMIT WEIGHTS;")
            .unwrap();
        f.conn.bind(&f.registry, "w").unwrap();
        let ticket = f.engine.evaluate(&f.conn).unwrap();
        let Decision::Weights { weights } = &ticket.decision else {
            panic!("expected weights");
        };
        let pairs: Vec<_> = weights.iter().map(|w| (w.id, w.weight)).collect();
        assert_eq!(pairs, vec![(1, 250), (2, 0), (3, 750)]);
        assert_eq!(ticket.decision.weight_total(), 1000);
    }

    #[test]
    fn fault_falls_back() {
        let f = fixture();
        f.registry.load("SCHEDULER bad; EMIT SUBFLOW[9];").unwrap();
        f.conn.bind(&f.registry, "bad").unwrap();
        let ticket = f.engine.evaluate(&f.conn).unwrap();
        assert_eq!(ticket.origin, DecisionOrigin::Heuristic(FallbackReason::Fault));
        assert_eq!(ticket.decision, Decision::Subflow { id: 2 });
        assert_eq!(f.engine.diagnostics().faults_total(), 1);
    }

    #[test]
    fn ticket_serializes_origin() {
        let f = fixture();
        let ticket = f.engine.evaluate(&f.conn).unwrap();
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["origin"]["source"], "heuristic");
        assert_eq!(json["origin"]["reason"], "unbound");
        assert_eq!(json["decision"]["kind"], "subflow");
    }
}
