//! StepBudget — instruction accounting for one evaluation.
//!
//! Every executed instruction is charged one step, loop iterations
//! included. Once the limit is passed the evaluation is aborted. The budget
//! is counted in instructions, not wall-clock time, so the outcome of an
//! evaluation does not depend on host load.

use crate::error::Fault;

/// Per-evaluation step counter.
#[derive(Debug, Clone)]
pub struct StepBudget {
    /// Maximum steps this evaluation may execute.
    limit: u64,
    /// Steps charged so far.
    used: u64,
}

impl StepBudget {
    pub fn new(limit: u64) -> Self {
        Self { limit, used: 0 }
    }

    /// Charge one step. Fails once the limit is exceeded.
    pub fn charge(&mut self) -> Result<(), Fault> {
        self.used += 1;
        if self.used > self.limit {
            Err(Fault::BudgetExceeded { limit: self.limit })
        } else {
            Ok(())
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_steps_within_limit() {
        let mut budget = StepBudget::new(3);
        assert!(budget.charge().is_ok());
        assert!(budget.charge().is_ok());
        assert!(budget.charge().is_ok());
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn denies_step_beyond_limit() {
        let mut budget = StepBudget::new(1);
        budget.charge().unwrap();
        assert_eq!(budget.charge(), Err(Fault::BudgetExceeded { limit: 1 }));
        assert_eq!(budget.limit(), 1);
    }
}
