// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Tuning tables for the cascade: default budgets by input size,
//! trial division scaling, restart counts and the ascending
//! (B1, B2) tiers of the algebraic and elliptic stages.
//!
//! Costs are declared in modular multiplications; stage 1 of P-1
//! costs about 1.44 B1 multiplications, stage 2 about pi(B2).

use std::cmp::{max, min};

/// Default wall budget for a synchronous query, by bit length.
pub fn default_budget_ms(bits: u32) -> u64 {
    match bits {
        48..=52 => 150,
        53..=56 => 250,
        57..=60 => 400,
        61..=64 => 700,
        _ => 600,
    }
}

/// Rough conversion between wall budget and modular multiplications,
/// used to decide whether a tier still fits in the deadline.
pub const MULTS_PER_MS: u64 = 2_000;

/// Trial division limit scaled to the remaining iteration budget.
/// The floor is deliberately tiny so that very small budgets leave
/// close-factor inputs to the near-square stage.
pub fn trial_limit(remaining_iters: u64) -> u64 {
    min(1_000_000, max(64, remaining_iters / 50))
}

/// Bounded number of increments for the Fermat near-square search.
pub const FERMAT_STEPS: u64 = 256;

/// Batch size for the rho product-of-differences between GCDs.
pub const RHO_BATCH: u64 = 256;

/// Concurrent rho restarts raced for one input.
pub fn rho_instances(bits: u32) -> usize {
    match bits {
        0..=99 => 2,
        100..=132 => 4,
        _ => 8,
    }
}

/// Iterations allotted to a single (seed, c) rho attempt before
/// restarting with a fresh pair.
pub fn rho_round_iters(bits: u32) -> u64 {
    match bits {
        0..=32 => 5_000,
        33..=48 => 20_000,
        49..=64 => 60_000,
        65..=96 => 200_000,
        _ => 500_000,
    }
}

/// A smoothness tier with bounds B1/B2 and a declared cost in
/// modular multiplications.
#[derive(Clone, Copy, Debug)]
pub struct Tier {
    pub b1: u64,
    pub b2: u64,
    pub cost: u64,
}

/// Ascending Pollard P-1 tiers.
pub fn pm1_tiers() -> &'static [Tier] {
    &[
        Tier { b1: 2_000, b2: 60_000, cost: 10_000 },
        Tier { b1: 20_000, b2: 600_000, cost: 80_000 },
        Tier { b1: 100_000, b2: 3_000_000, cost: 400_000 },
    ]
}

/// Ascending Williams P+1 tiers (per seed; stage 1 costs about twice
/// as much as P-1 due to the Lucas chains).
pub fn pp1_tiers() -> &'static [Tier] {
    &[
        Tier { b1: 2_000, b2: 50_000, cost: 16_000 },
        Tier { b1: 20_000, b2: 500_000, cost: 160_000 },
    ]
}

/// Seeds for the P+1 conic; the usual recommendation is to try a few
/// seeds since only quadratic non-residues reach the twisted group.
pub const PP1_SEEDS: [u64; 3] = [3, 9, 17];

/// An ECM tier: stage 1 bound, curve count and declared cost.
#[derive(Clone, Copy, Debug)]
pub struct EcmTier {
    pub b1: u64,
    pub curves: u32,
    pub cost: u64,
}

/// Ascending ECM stage 1 tiers. Jacobian arithmetic costs roughly
/// 15 multiplications per exponent bit, hence the steep costs.
pub fn ecm_tiers() -> &'static [EcmTier] {
    &[
        EcmTier { b1: 2_000, curves: 8, cost: 350_000 },
        EcmTier { b1: 11_000, curves: 16, cost: 3_800_000 },
        EcmTier { b1: 50_000, curves: 32, cost: 35_000_000 },
    ]
}

/// Iteration/restart counts handed to the external 64-bit helper.
pub const RHO64_ITERS: u64 = 300_000;
pub const RHO64_RESTARTS: u32 = 128;

/// Ceiling for cofactor recursion.
pub const MAX_RECURSION: u32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_table() {
        assert_eq!(default_budget_ms(50), 150);
        assert_eq!(default_budget_ms(53), 250);
        assert_eq!(default_budget_ms(60), 400);
        assert_eq!(default_budget_ms(64), 700);
        // Fallback outside the table.
        assert_eq!(default_budget_ms(13), 600);
        assert_eq!(default_budget_ms(256), 600);
    }

    #[test]
    fn test_trial_limit() {
        assert_eq!(trial_limit(2_000), 64);
        assert_eq!(trial_limit(500_000), 10_000);
        assert_eq!(trial_limit(u64::MAX), 1_000_000);
    }

    #[test]
    fn test_tiers_ascend() {
        for w in pm1_tiers().windows(2) {
            assert!(w[0].b1 < w[1].b1 && w[0].cost < w[1].cost);
        }
        for w in ecm_tiers().windows(2) {
            assert!(w[0].b1 < w[1].b1 && w[0].cost < w[1].cost);
        }
    }
}
