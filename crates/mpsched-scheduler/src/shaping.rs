//! Bandwidth floor/ceiling post-filter for weighted decisions.
//!
//! Weights are read as shares of the aggregate measured bandwidth of the
//! candidate set. A subflow with a nonzero weight is raised to at least the
//! floor and capped at the ceiling; what is taken from or given back by the
//! clamped subflows is redistributed over the rest in proportion to their
//! original weights, repeating until no share violates a bound.

use mpsched_core::{Subflow, SubflowId, SubflowWeight};

use crate::heuristics::quantize;

/// Per-subflow bandwidth bounds, in the same unit as [`Subflow::bandwidth`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandwidthBounds {
    pub floor: Option<u64>,
    pub ceiling: Option<u64>,
}

impl BandwidthBounds {
    /// Bounds from raw register values; non-positive values mean "unset".
    pub fn from_registers(floor: Option<i64>, ceiling: Option<i64>) -> Self {
        let positive = |v: Option<i64>| v.and_then(|v| u64::try_from(v).ok()).filter(|&v| v > 0);
        Self {
            floor: positive(floor),
            ceiling: positive(ceiling),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.floor.is_none() && self.ceiling.is_none()
    }
}

/// Rescale `weights` so each nonzero share of the aggregate bandwidth lies
/// within `bounds`. The result still sums to `weight_total`.
///
/// A subflow raised to the floor gets at least the floor's share of
/// `weight_total` rounded up, taken one unit at a time from the largest
/// unclamped weights, as long as those stay above that share themselves.
///
/// Returns the input unchanged when no bound is set or the candidates report
/// no bandwidth at all.
pub fn apply_bounds(
    weights: Vec<SubflowWeight>,
    candidates: &[Subflow],
    bounds: BandwidthBounds,
    weight_total: u32,
) -> Vec<SubflowWeight> {
    let aggregate: u128 = candidates.iter().map(|s| u128::from(s.bandwidth)).sum();
    if bounds.is_unbounded() || aggregate == 0 {
        return weights;
    }

    let floor = bounds.floor.map(u128::from);
    let ceiling = bounds.ceiling.map(u128::from);

    // `None` while a subflow still shares the remaining budget.
    let mut fixed: Vec<Option<u128>> = weights
        .iter()
        .map(|w| (w.weight == 0).then_some(0))
        .collect();
    let mut floored = vec![false; weights.len()];

    loop {
        let free: Vec<usize> = (0..weights.len()).filter(|&i| fixed[i].is_none()).collect();
        if free.is_empty() {
            break;
        }
        let committed: u128 = fixed.iter().flatten().sum();
        let budget = aggregate.saturating_sub(committed);
        let free_weight: u128 = free.iter().map(|&i| u128::from(weights[i].weight)).sum();
        let share = |i: usize| budget * u128::from(weights[i].weight) / free_weight;

        // Floors first: raising a share only lowers the others.
        let low: Vec<usize> = match floor {
            Some(f) => free.iter().copied().filter(|&i| share(i) < f).collect(),
            None => Vec::new(),
        };
        if !low.is_empty() {
            for i in low {
                fixed[i] = floor;
                floored[i] = true;
            }
            continue;
        }

        let high: Vec<usize> = match ceiling {
            Some(c) => free.iter().copied().filter(|&i| share(i) > c).collect(),
            None => Vec::new(),
        };
        if !high.is_empty() {
            for i in high {
                fixed[i] = ceiling;
            }
            continue;
        }

        for i in free {
            fixed[i] = Some(share(i));
        }
        break;
    }

    let raw: Vec<(SubflowId, u128)> = weights
        .iter()
        .zip(&fixed)
        .map(|(w, alloc)| (w.id, alloc.unwrap_or(0)))
        .collect();
    if raw.iter().all(|&(_, r)| r == 0) {
        return weights;
    }
    let mut shaped = quantize(&raw, weight_total);
    if let Some(f) = floor {
        let min_weight = (f * u128::from(weight_total)).div_ceil(aggregate);
        let min_weight = u32::try_from(min_weight).unwrap_or(weight_total).min(weight_total);
        round_up_floors(&mut shaped, &floored, min_weight);
    }
    shaped
}

fn round_up_floors(shaped: &mut [SubflowWeight], floored: &[bool], min_weight: u32) {
    for i in 0..shaped.len() {
        while floored[i] && shaped[i].weight < min_weight {
            let donor = (0..shaped.len())
                .filter(|&j| !floored[j] && shaped[j].weight > min_weight)
                .max_by_key(|&j| (shaped[j].weight, std::cmp::Reverse(j)));
            let Some(j) = donor else {
                return;
            };
            shaped[j].weight -= 1;
            shaped[i].weight += 1;
        }
    }
}
