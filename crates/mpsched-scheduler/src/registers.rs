//! Per-connection register file.
//!
//! The whole file is published copy-on-write: a write clones the current
//! values, changes one slot, and swaps the new array in. A snapshot is a
//! single pointer load, so an evaluation always sees one consistent
//! version of every register, and never a write that started after it.

use std::sync::Arc;

use arc_swap::ArcSwap;

use mpsched_core::RegisterIndex;

use crate::error::{ControlError, ControlResult};

pub struct RegisterFile {
    values: ArcSwap<Vec<i64>>,
    count: u8,
}

impl RegisterFile {
    /// A register file of `count` registers, all zero.
    pub fn new(count: u8) -> Self {
        Self {
            values: ArcSwap::from_pointee(vec![0; usize::from(count)]),
            count,
        }
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    fn slot(&self, index: RegisterIndex) -> ControlResult<usize> {
        index
            .slot(self.count)
            .ok_or(ControlError::InvalidRegisterIndex {
                index,
                count: self.count,
            })
    }

    /// Publish a new value. Visible to every snapshot taken after return.
    pub fn set(&self, index: RegisterIndex, value: i64) -> ControlResult<()> {
        let slot = self.slot(index)?;
        self.values.rcu(|current| {
            let mut next = Vec::clone(current);
            next[slot] = value;
            next
        });
        Ok(())
    }

    /// Last published value, 0 if never written.
    pub fn get(&self, index: RegisterIndex) -> ControlResult<i64> {
        let slot = self.slot(index)?;
        Ok(self.values.load()[slot])
    }

    /// One consistent copy of every register; index 0 holds R1.
    pub fn snapshot(&self) -> Arc<Vec<i64>> {
        self.values.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpsched_core::{R1, R4, R6};

    #[test]
    fn unset_registers_read_zero() {
        let regs = RegisterFile::new(6);
        assert_eq!(regs.get(R1), Ok(0));
        assert_eq!(regs.get(R6), Ok(0));
    }

    #[test]
    fn set_then_get_returns_last_value() {
        let regs = RegisterFile::new(6);
        regs.set(R4, 1).unwrap();
        regs.set(R4, -17).unwrap();
        assert_eq!(regs.get(R4), Ok(-17));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let regs = RegisterFile::new(4);
        let err = regs.set(RegisterIndex(5), 1).unwrap_err();
        assert_eq!(
            err,
            ControlError::InvalidRegisterIndex {
                index: RegisterIndex(5),
                count: 4
            }
        );
        assert!(regs.get(RegisterIndex(0)).is_err());
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let regs = RegisterFile::new(6);
        regs.set(R1, 3).unwrap();
        let snap = regs.snapshot();
        regs.set(R1, 9).unwrap();
        assert_eq!(snap[0], 3);
        assert_eq!(regs.snapshot()[0], 9);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        use std::thread;

        let regs = Arc::new(RegisterFile::new(6));
        let handles: Vec<_> = (1..=4u8)
            .map(|r| {
                let regs = regs.clone();
                thread::spawn(move || {
                    for v in 1..=200 {
                        regs.set(RegisterIndex(r), v).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = regs.snapshot();
        assert_eq!(&snap[..4], &[200, 200, 200, 200]);
        assert_eq!(&snap[4..], &[0, 0]);
    }
}
