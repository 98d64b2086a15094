//! Built-in fallback heuristics and weight quantization.
//!
//! Used whenever no program decision is available: the connection is
//! unbound, its program is gone, the program deferred, or it was aborted.

use mpsched_core::{Decision, Subflow, SubflowId, SubflowWeight};

/// Which heuristic the mode register selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Mode 0: the single subflow with the lowest RTT.
    LowestRtt,
    /// Mode 1: split proportionally to measured bandwidth.
    BandwidthWeighted,
}

impl FallbackMode {
    /// Unknown modes behave like mode 0.
    pub fn from_register(value: i64) -> Self {
        match value {
            1 => FallbackMode::BandwidthWeighted,
            _ => FallbackMode::LowestRtt,
        }
    }
}

/// Run `mode` over `candidates`. `None` only when there are no candidates.
pub fn fallback(mode: FallbackMode, candidates: &[Subflow], weight_total: u32) -> Option<Decision> {
    match mode {
        FallbackMode::LowestRtt => lowest_rtt(candidates).map(|id| Decision::Subflow { id }),
        FallbackMode::BandwidthWeighted => {
            bandwidth_weighted(candidates, weight_total).map(|weights| Decision::Weights { weights })
        }
    }
}

/// Lowest RTT wins; ties go to the lowest id.
pub fn lowest_rtt(candidates: &[Subflow]) -> Option<SubflowId> {
    candidates
        .iter()
        .min_by_key(|s| (s.rtt_us, s.id))
        .map(|s| s.id)
}

/// Weights proportional to bandwidth, or equal weights when no subflow
/// reports any bandwidth.
pub fn bandwidth_weighted(candidates: &[Subflow], weight_total: u32) -> Option<Vec<SubflowWeight>> {
    if candidates.is_empty() {
        return None;
    }
    let raw: Vec<(SubflowId, u128)> = candidates
        .iter()
        .map(|s| (s.id, u128::from(s.bandwidth)))
        .collect();
    Some(quantize(&raw, weight_total))
}

/// Scale raw shares so they sum to exactly `total`.
///
/// Largest remainder: every entry gets the floor of its exact share, and the
/// leftover units go to the largest fractional parts, ties to the lowest id.
/// An all-zero input is treated as equal shares.
pub fn quantize(raw: &[(SubflowId, u128)], total: u32) -> Vec<SubflowWeight> {
    let mut sum: u128 = raw.iter().map(|&(_, r)| r).sum();
    let equal = sum == 0;
    if equal {
        sum = raw.len() as u128;
    }
    if sum == 0 {
        return Vec::new();
    }

    let total_wide = u128::from(total);
    let mut shares: Vec<(SubflowId, u128, u128)> = raw
        .iter()
        .map(|&(id, r)| {
            let r = if equal { 1 } else { r };
            let scaled = r * total_wide;
            (id, scaled / sum, scaled % sum)
        })
        .collect();

    let assigned: u128 = shares.iter().map(|&(_, base, _)| base).sum();
    let leftover = usize::try_from(total_wide - assigned).unwrap_or(0);

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        shares[b]
            .2
            .cmp(&shares[a].2)
            .then(shares[a].0.cmp(&shares[b].0))
    });
    for &i in order.iter().take(leftover) {
        shares[i].1 += 1;
    }

    shares
        .into_iter()
        .map(|(id, base, _)| SubflowWeight {
            id,
            weight: u32::try_from(base).unwrap_or(u32::MAX),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(ws: &[SubflowWeight]) -> Vec<(SubflowId, u32)> {
        ws.iter().map(|w| (w.id, w.weight)).collect()
    }

    #[test]
    fn mode_register_mapping() {
        assert_eq!(FallbackMode::from_register(0), FallbackMode::LowestRtt);
        assert_eq!(FallbackMode::from_register(1), FallbackMode::BandwidthWeighted);
        assert_eq!(FallbackMode::from_register(7), FallbackMode::LowestRtt);
        assert_eq!(FallbackMode::from_register(-1), FallbackMode::LowestRtt);
    }

    #[test]
    fn lowest_rtt_breaks_ties_by_id() {
        let candidates = vec![
            Subflow::new(3, 20_000, 10, 0),
            Subflow::new(1, 20_000, 10, 0),
            Subflow::new(2, 40_000, 10, 0),
        ];
        assert_eq!(lowest_rtt(&candidates), Some(1));
        assert_eq!(lowest_rtt(&[]), None);
    }

    #[test]
    fn bandwidth_weights_are_proportional() {
        let candidates = vec![
            Subflow::new(1, 10_000, 10, 3_000_000),
            Subflow::new(2, 10_000, 10, 1_000_000),
        ];
        let ws = bandwidth_weighted(&candidates, 1000).unwrap();
        assert_eq!(weights(&ws), vec![(1, 750), (2, 250)]);
    }

    #[test]
    fn zero_bandwidth_means_equal_split() {
        let candidates = vec![
            Subflow::new(1, 10_000, 10, 0),
            Subflow::new(2, 10_000, 10, 0),
            Subflow::new(3, 10_000, 10, 0),
        ];
        let ws = bandwidth_weighted(&candidates, 1000).unwrap();
        assert_eq!(weights(&ws), vec![(1, 334), (2, 333), (3, 333)]);
    }

    #[test]
    fn quantize_sums_exactly() {
        let raw = [(1, 1u128), (2, 1), (3, 1), (4, 1), (5, 1), (6, 1), (7, 1)];
        let ws = quantize(&raw, 1000);
        let total: u32 = ws.iter().map(|w| w.weight).sum();
        assert_eq!(total, 1000);
        assert_eq!(ws[0].weight, 143);
        assert_eq!(ws[6].weight, 142);
    }

    #[test]
    fn quantize_keeps_zero_entries_at_zero() {
        let ws = quantize(&[(1, 0), (2, 2), (3, 1)], 100);
        assert_eq!(weights(&ws), vec![(1, 0), (2, 67), (3, 33)]);
    }

    #[test]
    fn quantize_handles_huge_inputs() {
        let ws = quantize(&[(1, u128::from(u64::MAX)), (2, u128::from(u64::MAX))], 1000);
        assert_eq!(weights(&ws), vec![(1, 500), (2, 500)]);
    }

    #[test]
    fn fallback_dispatch() {
        let candidates = vec![
            Subflow::new(1, 30_000, 10, 1_000),
            Subflow::new(2, 10_000, 10, 3_000),
        ];
        assert_eq!(
            fallback(FallbackMode::LowestRtt, &candidates, 1000),
            Some(Decision::Subflow { id: 2 })
        );
        let Some(Decision::Weights { weights: ws }) =
            fallback(FallbackMode::BandwidthWeighted, &candidates, 1000)
        else {
            panic!("expected weights");
        };
        assert_eq!(weights(&ws), vec![(1, 250), (2, 750)]);
        assert_eq!(fallback(FallbackMode::LowestRtt, &[], 1000), None);
    }
}
