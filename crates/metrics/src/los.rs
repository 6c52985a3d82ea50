use std::collections::BTreeMap;

use serde::Serialize;
use tidepool_types::chain::{gas_score, ChainId};
use tracing::debug;

use crate::engine::ChainMetrics;

/// Score assigned to chains that must not receive allocation. Low enough
/// that `exp(score - max)` underflows to zero against any real candidate.
pub const EXCLUDED_SCORE: f64 = -1000.0;

/// Shares below this are not worth deploying; they get zeroed and the
/// remainder re-normalized.
pub const ALLOCATION_FLOOR_PCT: f64 = 5.0;

const FEE_WEIGHT: f64 = 0.7;
const VOLATILITY_WEIGHT: f64 = 0.2;
const GAS_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LosComponents {
    pub fee_yield_rate: f64,
    pub volatility:     f64,
    pub gas_factor:     f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LosScore {
    pub chain_id:          ChainId,
    pub score:             f64,
    pub components:        LosComponents,
    /// Percentage of capital this chain should hold, 0-100.
    pub target_allocation: f64
}

/// Raw opportunity score for one chain. Missing metrics contribute zero
/// rather than disqualifying the chain.
pub fn score_chain(chain_id: ChainId, metrics: &ChainMetrics) -> LosScore {
    let fee_yield_rate = metrics.best_fee_apr().unwrap_or(0.0);
    let volatility = metrics.best_volatility().unwrap_or(0.0);
    let gas_factor = gas_score(chain_id);

    let score = 100.0 * fee_yield_rate * FEE_WEIGHT +
        500.0 * volatility * VOLATILITY_WEIGHT +
        gas_factor * GAS_WEIGHT;

    LosScore {
        chain_id,
        score,
        components: LosComponents { fee_yield_rate, volatility, gas_factor },
        target_allocation: 0.0
    }
}

/// Scores every chain, overrides the excluded ones and projects the result
/// onto the allocation simplex.
pub fn compute_scores(
    metrics: &BTreeMap<ChainId, ChainMetrics>,
    excluded: &[ChainId]
) -> BTreeMap<ChainId, LosScore> {
    let mut scores: BTreeMap<ChainId, LosScore> = metrics
        .iter()
        .map(|(chain, m)| {
            let mut score = score_chain(*chain, m);
            if excluded.contains(chain) {
                score.score = EXCLUDED_SCORE;
            }
            (*chain, score)
        })
        .collect();
    allocate(&mut scores);
    scores
}

/// Softmax with max-subtraction, then the viability floor, then a final
/// re-normalization so survivors sum to 100.
pub fn allocate(scores: &mut BTreeMap<ChainId, LosScore>) {
    let max = scores
        .values()
        .filter(|s| s.score > EXCLUDED_SCORE)
        .map(|s| s.score)
        .fold(f64::NEG_INFINITY, f64::max);

    if max == f64::NEG_INFINITY {
        // nothing eligible, deploy nowhere
        for score in scores.values_mut() {
            score.target_allocation = 0.0;
        }
        return
    }

    let mut weights: BTreeMap<ChainId, f64> = scores
        .iter()
        .map(|(chain, s)| {
            let w = if s.score <= EXCLUDED_SCORE { 0.0 } else { (s.score - max).exp() };
            (*chain, w)
        })
        .collect();

    let total: f64 = weights.values().sum();
    for weight in weights.values_mut() {
        *weight = *weight / total * 100.0;
    }

    // below the floor a deployment is not worth its fixed costs
    for (chain, weight) in weights.iter_mut() {
        if *weight > 0.0 && *weight < ALLOCATION_FLOOR_PCT {
            debug!(chain, share = *weight, "allocation below floor, zeroing");
            *weight = 0.0;
        }
    }

    let surviving: f64 = weights.values().sum();
    for (chain, score) in scores.iter_mut() {
        score.target_allocation =
            if surviving > 0.0 { weights[chain] / surviving * 100.0 } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn scores_from(raw: &[(ChainId, f64)]) -> BTreeMap<ChainId, LosScore> {
        raw.iter()
            .map(|(chain, score)| {
                (
                    *chain,
                    LosScore {
                        chain_id:          *chain,
                        score:             *score,
                        components:        LosComponents {
                            fee_yield_rate: 0.0,
                            volatility:     0.0,
                            gas_factor:     0.0
                        },
                        target_allocation: 0.0
                    }
                )
            })
            .collect()
    }

    #[test]
    fn softmax_orders_and_conserves() {
        let mut scores =
            scores_from(&[(1, EXCLUDED_SCORE), (10, 3.5), (130, 0.3), (8453, 4.0)]);
        allocate(&mut scores);

        let total: f64 = scores.values().map(|s| s.target_allocation).sum();
        assert!((total - 100.0).abs() < 1e-6);

        assert_eq!(scores[&1].target_allocation, 0.0, "excluded chain gets nothing");
        assert!(scores[&8453].target_allocation > scores[&10].target_allocation);

        // with these scores chain 130's softmax share (~1.5%) dies at the
        // floor and the two leaders absorb it
        assert_eq!(scores[&130].target_allocation, 0.0);
        let expected_8453 = 100.0 / (1.0 + (-0.5f64).exp());
        assert!((scores[&8453].target_allocation - expected_8453).abs() < 1e-6);
    }

    #[test]
    fn floor_zeroes_the_dust_and_renormalizes() {
        let mut scores = scores_from(&[(10, 0.1), (8453, 10.0)]);
        allocate(&mut scores);

        assert_eq!(scores[&10].target_allocation, 0.0);
        assert!((scores[&8453].target_allocation - 100.0).abs() < 1e-9);
    }

    #[test]
    fn all_excluded_means_no_allocation() {
        let mut scores = scores_from(&[(1, EXCLUDED_SCORE), (10, EXCLUDED_SCORE)]);
        allocate(&mut scores);
        assert!(scores.values().all(|s| s.target_allocation == 0.0));
    }

    #[test]
    fn equal_scores_split_evenly() {
        let mut scores = scores_from(&[(10, 2.0), (130, 2.0), (8453, 2.0)]);
        allocate(&mut scores);
        for score in scores.values() {
            assert!((score.target_allocation - 100.0 / 3.0).abs() < 1e-9);
        }
    }

    proptest! {
        /// Conservation: softmax + floor + renorm always lands on 100
        /// when anything survives, and every share respects the floor.
        #[test]
        fn allocation_simplex_invariants(
            raw in proptest::collection::btree_map(0u64..200, -5.0f64..15.0, 1..12)
        ) {
            let pairs: Vec<(ChainId, f64)> = raw.into_iter().collect();
            let mut scores = scores_from(&pairs);
            allocate(&mut scores);

            let total: f64 = scores.values().map(|s| s.target_allocation).sum();
            prop_assert!((total - 100.0).abs() < 1e-6);

            for score in scores.values() {
                let alloc = score.target_allocation;
                prop_assert!(alloc == 0.0 || alloc >= ALLOCATION_FLOOR_PCT - 1e-9);
                prop_assert!(alloc <= 100.0 + 1e-9);
            }
        }
    }
}
