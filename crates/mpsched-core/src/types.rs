//! Shared types used across mpsched crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one multipath-capable transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies one subflow within a connection.
pub type SubflowId = u32;

/// A 1-based register index (`R1`, `R2`, ...).
///
/// The index is not range-checked on construction: the valid range depends
/// on the configured register count, and out-of-range writes must surface as
/// errors rather than being silently clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegisterIndex(pub u8);

/// Hard upper bound on the number of registers per connection.
pub const MAX_REGISTERS: u8 = 16;

pub const R1: RegisterIndex = RegisterIndex(1);
pub const R2: RegisterIndex = RegisterIndex(2);
pub const R3: RegisterIndex = RegisterIndex(3);
pub const R4: RegisterIndex = RegisterIndex(4);
pub const R5: RegisterIndex = RegisterIndex(5);
pub const R6: RegisterIndex = RegisterIndex(6);

impl RegisterIndex {
    /// Zero-based position in a register file of `count` registers, if valid.
    pub fn slot(self, count: u8) -> Option<usize> {
        if self.0 >= 1 && self.0 <= count {
            Some(usize::from(self.0 - 1))
        } else {
            None
        }
    }

    /// Parse `"R3"` / `"r3"` / `"3"`.
    pub fn parse(text: &str) -> Option<Self> {
        let digits = text
            .strip_prefix('R')
            .or_else(|| text.strip_prefix('r'))
            .unwrap_or(text);
        digits.parse::<u8>().ok().map(RegisterIndex)
    }
}

impl fmt::Display for RegisterIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// One physical path of a connection, as reported by the path-state adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subflow {
    pub id: SubflowId,
    /// Smoothed round-trip time in microseconds.
    pub rtt_us: u64,
    /// Congestion window in segments.
    #[serde(default)]
    pub cwnd: u32,
    /// Throughput estimate in bytes per second.
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Subflow {
    /// An active subflow with the given metrics.
    pub fn new(id: SubflowId, rtt_us: u64, cwnd: u32, bandwidth: u64) -> Self {
        Self {
            id,
            rtt_us,
            cwnd,
            bandwidth,
            active: true,
        }
    }
}

/// Weight allotted to one subflow in a weighted decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubflowWeight {
    pub id: SubflowId,
    pub weight: u32,
}

/// What the decision engine hands back to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    /// Send the next unit of data on this subflow.
    Subflow { id: SubflowId },
    /// Split traffic across the candidate set. Weights sum to the configured total.
    Weights { weights: Vec<SubflowWeight> },
}

impl Decision {
    /// Every subflow id the decision names.
    pub fn subflow_ids(&self) -> Vec<SubflowId> {
        match self {
            Decision::Subflow { id } => vec![*id],
            Decision::Weights { weights } => weights.iter().map(|w| w.id).collect(),
        }
    }

    /// The chosen subflow, for single-subflow decisions.
    pub fn chosen(&self) -> Option<SubflowId> {
        match self {
            Decision::Subflow { id } => Some(*id),
            Decision::Weights { .. } => None,
        }
    }

    /// Sum of all weights (zero for single-subflow decisions).
    pub fn weight_total(&self) -> u64 {
        match self {
            Decision::Subflow { .. } => 0,
            Decision::Weights { weights } => weights.iter().map(|w| u64::from(w.weight)).sum(),
        }
    }
}
