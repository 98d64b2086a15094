use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use mpsched_core::{Decision, EngineConfig, RegisterIndex, Subflow};
use mpsched_runtime::ProgramHandle;
use mpsched_scheduler::{DecisionOrigin, DecisionTicket, SchedulerRuntime, StaticPathState};

/// A scenario file: one connection's registers, user value and subflows.
///
/// ```toml
/// evaluations = 5
/// user = 0
///
/// [registers]
/// R4 = 1
///
/// [[subflows]]
/// id = 1
/// rtt_us = 10000
/// bandwidth = 5000000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_evaluations")]
    pub evaluations: u32,
    #[serde(default)]
    pub user: i64,
    #[serde(default)]
    pub registers: BTreeMap<String, i64>,
    #[serde(default)]
    pub subflows: Vec<Subflow>,
}

fn default_evaluations() -> u32 {
    1
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Serialize)]
pub struct Simulation {
    pub program: ProgramHandle,
    pub decisions: Vec<DecisionTicket>,
    pub budget_exceeded: u64,
    pub faults: u64,
}

pub fn simulate(
    program: &str,
    scenario: &str,
    config: Option<&str>,
    format: &str,
) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let source = std::fs::read_to_string(program)
        .with_context(|| format!("reading program {program}"))?;
    let scenario = Scenario::from_file(Path::new(scenario))?;
    let simulation = run(config, &source, &scenario)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&simulation)?),
        _ => print!("{}", format_simulation(&simulation)),
    }
    Ok(())
}

/// Load `source`, open one connection shaped by `scenario` and evaluate it
/// `scenario.evaluations` times, acknowledging every decision.
pub fn run(config: EngineConfig, source: &str, scenario: &Scenario) -> anyhow::Result<Simulation> {
    let paths = Arc::new(StaticPathState::new());
    let runtime = SchedulerRuntime::new(config, paths.clone())?;

    let program = runtime.load_scheduler(source)?;
    let conn = runtime.open_connection(true);
    for (name, value) in &scenario.registers {
        let index = RegisterIndex::parse(name)
            .with_context(|| format!("invalid register name {name:?}"))?;
        runtime.set_register(conn, index, *value)?;
    }
    runtime.set_user(conn, scenario.user)?;
    paths.update(conn, scenario.subflows.clone());
    runtime.set_scheduler(conn, &program.name)?;

    let mut decisions = Vec::new();
    for _ in 0..scenario.evaluations {
        if let Some(ticket) = runtime.evaluate(conn) {
            runtime.acknowledge(conn, ticket.seq);
            decisions.push(ticket);
        }
    }

    let simulation = Simulation {
        program,
        decisions,
        budget_exceeded: runtime.diagnostics().budget_exceeded_total(),
        faults: runtime.diagnostics().faults_total(),
    };
    runtime.shutdown();
    Ok(simulation)
}

fn format_simulation(sim: &Simulation) -> String {
    let mut out = format!(
        "{} v{} ({} instructions)\n",
        sim.program.name, sim.program.version, sim.program.instructions
    );
    if sim.decisions.is_empty() {
        out.push_str("  no active subflows, no decisions\n");
    }
    for ticket in &sim.decisions {
        let decision = match &ticket.decision {
            Decision::Subflow { id } => format!("subflow {id}"),
            Decision::Weights { weights } => weights
                .iter()
                .map(|w| format!("{}:{}", w.id, w.weight))
                .collect::<Vec<_>>()
                .join(" "),
        };
        let origin = match ticket.origin {
            DecisionOrigin::Program => "program".to_string(),
            DecisionOrigin::Heuristic(reason) => format!("heuristic, {reason:?}"),
        };
        out.push_str(&format!(
            "  #{:<4} {decision:<32} ({origin}, {} steps)\n",
            ticket.seq, ticket.steps
        ));
    }
    if sim.budget_exceeded > 0 || sim.faults > 0 {
        out.push_str(&format!(
            "  aborted: {} over budget, {} faulted\n",
            sim.budget_exceeded, sim.faults
        ));
    }
    out
}
