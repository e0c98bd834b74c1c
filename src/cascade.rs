// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The factoring cascade: a state machine over one attempt, racing
//! methods in ascending expected cost under one shared deadline.
//!
//! Order: BPSW oracle, trial division, Fermat near-square search,
//! P-1 tiers, P+1 tiers, SQUFOF and the external rho helper for
//! word-sized inputs, Brent rho restarts, ECM tiers, external ECM.
//! The cheap structure-dependent methods go first; rho and ECM make
//! no assumption about the factors and run last.
//!
//! Every candidate divisor is validated (divisibility and
//! reconstruction) before acceptance; a failing candidate is
//! discarded and the cascade continues. Both cofactors are
//! classified, and a composite one is split recursively with half
//! the remaining budget. Exhausting all stages inside the budget is
//! the explicitly ambiguous `Exhausted` outcome, not an error and
//! not a primality proof.

use std::time::Duration;

use crate::deadline::Deadline;
use crate::exec_tools::{EcmMode, Rho64Reply, ToolResult, Tools};
use crate::fbase::PrimeSieve;
use crate::{arith, ecm, fermat, params, pollard_pm1, pollard_rho, pp1, primality, squfof};
use crate::{Uint, Verbosity};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Prime { trace: Vec<String> },
    Factored(Factored),
    Exhausted { trace: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Factored {
    pub p: Uint,
    pub q: Uint,
    pub method: &'static str,
    pub p_prime: bool,
    pub q_prime: bool,
    pub trace: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    Cascade,
    RhoOnly,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub strategy: Strategy,
    pub verbosity: Verbosity,
    /// Base seed for randomized stages; a fixed seed reproduces the
    /// whole attempt.
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            strategy: Strategy::Cascade,
            verbosity: Verbosity::Silent,
            seed: 1,
        }
    }
}

/// Factors n under the given deadline. n must be >= 2; callers
/// validate inputs before invoking the cascade.
pub fn factor(
    n: &Uint,
    deadline: &Deadline,
    tools: &Tools,
    tpool: Option<&rayon::ThreadPool>,
    settings: &Settings,
) -> Outcome {
    classify(n, deadline, 0, tools, tpool, settings)
}

fn classify(
    n: &Uint,
    deadline: &Deadline,
    depth: u32,
    tools: &Tools,
    tpool: Option<&rayon::ThreadPool>,
    settings: &Settings,
) -> Outcome {
    debug_assert!(*n >= Uint::from_digit(2));
    let mut trace = Vec::new();
    if primality::is_probable_prime(n) {
        trace.push("n is probable prime (BPSW)".to_string());
        return Outcome::Prime { trace };
    }
    let bits = n.bits();
    let n64 = n.digits()[0];

    // Trial division, with a limit scaled to the remaining budget.
    let limit = params::trial_limit(remaining_budget_iters(deadline));
    match trial_divide(n, limit, deadline) {
        Some(p) => {
            if let Some(out) = accept(
                n, Uint::from_digit(p), "trial", &mut trace, depth, deadline, tools, tpool,
                settings,
            ) {
                return out;
            }
        }
        None => trace.push(format!("trial division missed (limit {limit})")),
    }
    if deadline.check().is_err() {
        return exhausted(trace, deadline);
    }

    if settings.strategy == Strategy::RhoOnly {
        return rho_stage(n, &mut trace, depth, deadline, tools, tpool, settings);
    }

    // Fermat near-square search.
    match fermat::fermat(n, params::FERMAT_STEPS, deadline) {
        Some((p, _)) => {
            if let Some(out) =
                accept(n, p, "fermat", &mut trace, depth, deadline, tools, tpool, settings)
            {
                return out;
            }
        }
        None => trace.push(format!("fermat missed ({} steps)", params::FERMAT_STEPS)),
    }
    if deadline.check().is_err() {
        return exhausted(trace, deadline);
    }

    // Pollard P-1, ascending tiers.
    for t in params::pm1_tiers() {
        if !deadline.allows(t.cost) {
            trace.push(format!("p-1 tier B1={} skipped (budget)", t.b1));
            continue;
        }
        match pollard_pm1::pm1(n, t.b1, t.b2, deadline, settings.verbosity) {
            Some((p, _)) => {
                if let Some(out) =
                    accept(n, p, "p-1", &mut trace, depth, deadline, tools, tpool, settings)
                {
                    return out;
                }
            }
            None => trace.push(format!("p-1 missed (B1={} B2={})", t.b1, t.b2)),
        }
        if deadline.check().is_err() {
            return exhausted(trace, deadline);
        }
    }

    // Williams P+1, a few seeds per tier.
    'pp1: for t in params::pp1_tiers() {
        for seed in params::PP1_SEEDS {
            if !deadline.allows(t.cost) {
                trace.push(format!("p+1 tier B1={} skipped (budget)", t.b1));
                continue 'pp1;
            }
            match pp1::pp1(n, seed, t.b1, t.b2, deadline, settings.verbosity) {
                Some((p, _)) => {
                    if let Some(out) =
                        accept(n, p, "p+1", &mut trace, depth, deadline, tools, tpool, settings)
                    {
                        return out;
                    }
                }
                None => trace.push(format!("p+1 missed (seed={seed} B1={} B2={})", t.b1, t.b2)),
            }
            if deadline.check().is_err() {
                return exhausted(trace, deadline);
            }
        }
    }

    // SQUFOF for word-sized inputs.
    if bits <= 62 {
        match squfof::squfof(n64, deadline) {
            Some((p, _)) => {
                if let Some(out) = accept(
                    n, Uint::from_digit(p), "squfof", &mut trace, depth, deadline, tools, tpool,
                    settings,
                ) {
                    return out;
                }
            }
            None => trace.push("squfof missed".to_string()),
        }
        if deadline.check().is_err() {
            return exhausted(trace, deadline);
        }
    }

    rho_stage(n, &mut trace, depth, deadline, tools, tpool, settings)
}

/// Rho restarts, then ECM tiers, then the external ECM binary.
fn rho_stage(
    n: &Uint,
    trace: &mut Vec<String>,
    depth: u32,
    deadline: &Deadline,
    tools: &Tools,
    tpool: Option<&rayon::ThreadPool>,
    settings: &Settings,
) -> Outcome {
    let bits = n.bits();
    let n64 = n.digits()[0];

    // The external fixed-width helper gets a shot first on word-sized
    // inputs; its absence silently skips the stage.
    if bits <= 64 && tools.rho64.available() {
        let ms = deadline.remaining_ms().unwrap_or(250).min(250).max(20);
        match tools.rho64.attempt(
            n64,
            params::RHO64_ITERS,
            params::RHO64_RESTARTS,
            Duration::from_millis(ms),
        ) {
            Some(Rho64Reply::Factors(p, _)) => {
                if let Some(out) = accept(
                    n, Uint::from_digit(p), "rho64", trace, depth, deadline, tools, tpool,
                    settings,
                ) {
                    return out;
                }
            }
            Some(Rho64Reply::Prime) => {
                // Disagrees with the oracle; distrust the helper.
                trace.push("external rho claims prime, ignored".to_string());
            }
            None => trace.push("external rho missed".to_string()),
        }
    }

    // Brent rho with fresh (seed, c) pairs until the budget runs out.
    let mut round = 0_u64;
    loop {
        if deadline.check().is_err() || round >= 64 {
            trace.push(format!("rho missed after {round} rounds"));
            break;
        }
        let hit = if bits <= 62 {
            pollard_rho::rho64_rounds(n64, settings.seed.wrapping_add(round), deadline)
                .map(|(p, _)| Uint::from_digit(p))
        } else {
            pollard_rho::rho_race(
                n,
                settings.seed.wrapping_add(round.wrapping_mul(1009)),
                params::rho_round_iters(bits),
                params::rho_instances(bits),
                deadline,
                tpool,
            )
            .map(|(p, _)| p)
        };
        if let Some(p) = hit {
            if let Some(out) = accept(n, p, "rho", trace, depth, deadline, tools, tpool, settings)
            {
                return out;
            }
        }
        round += 1;
    }

    // ECM stage 1 tiers.
    for t in params::ecm_tiers() {
        if !deadline.allows(t.cost) {
            trace.push(format!("ecm tier B1={} skipped (budget)", t.b1));
            continue;
        }
        match ecm::ecm(
            n,
            t.b1,
            t.curves,
            settings.seed,
            deadline,
            tpool,
            settings.verbosity,
        ) {
            Some((p, _)) => {
                if let Some(out) =
                    accept(n, p, "ecm", trace, depth, deadline, tools, tpool, settings)
                {
                    return out;
                }
            }
            None => trace.push(format!("ecm missed (B1={} curves={})", t.b1, t.curves)),
        }
        if deadline.check().is_err() {
            return exhausted(std::mem::take(trace), deadline);
        }
    }

    // Deep ECM through the external binary when present.
    if tools.ecm.available() && deadline.check().is_ok() {
        let ms = deadline.remaining_ms().unwrap_or(30_000).min(30_000);
        if ms >= 200 {
            let (b1, curves) = match bits {
                0..=133 => (5_000, 30),
                134..=200 => (20_000, 60),
                201..=266 => (50_000, 120),
                _ => (110_000, 200),
            };
            match tools.ecm.attempt(
                n,
                EcmMode::Ecm,
                b1,
                None,
                curves,
                Duration::from_millis(ms),
            ) {
                ToolResult::Factor(p) => {
                    if let Some(out) =
                        accept(n, p, "ecm-ext", trace, depth, deadline, tools, tpool, settings)
                    {
                        return out;
                    }
                }
                ToolResult::Miss => trace.push("external ecm missed".to_string()),
                ToolResult::TimedOut => trace.push("external ecm timed out".to_string()),
                ToolResult::Unavailable => {}
            }
        }
    }

    exhausted(std::mem::take(trace), deadline)
}

/// Validates a candidate divisor; a hit concludes the attempt, a
/// reconstruction mismatch is recorded and the cascade goes on.
#[allow(clippy::too_many_arguments)]
fn accept(
    n: &Uint,
    g: Uint,
    method: &'static str,
    trace: &mut Vec<String>,
    depth: u32,
    deadline: &Deadline,
    tools: &Tools,
    tpool: Option<&rayon::ThreadPool>,
    settings: &Settings,
) -> Option<Outcome> {
    match validate(n, &g) {
        Some((p, q)) => {
            trace.push(format!("{method} found {p}"));
            Some(conclude(
                n,
                p,
                q,
                method,
                std::mem::take(trace),
                depth,
                deadline,
                tools,
                tpool,
                settings,
            ))
        }
        None => {
            trace.push(format!(
                "discarded candidate {g} from {method}: does not reconstruct n"
            ));
            None
        }
    }
}

fn validate(n: &Uint, g: &Uint) -> Option<(Uint, Uint)> {
    if *g <= Uint::ONE || g >= n || *n % *g != Uint::ZERO {
        return None;
    }
    let q = *n / *g;
    if *g * q != *n {
        return None;
    }
    Some((*g, q))
}

/// Classifies both cofactors; a composite factor is split further
/// with half of the remaining budget, bounded in depth.
#[allow(clippy::too_many_arguments)]
fn conclude(
    n: &Uint,
    p: Uint,
    q: Uint,
    method: &'static str,
    mut trace: Vec<String>,
    depth: u32,
    deadline: &Deadline,
    tools: &Tools,
    tpool: Option<&rayon::ThreadPool>,
    settings: &Settings,
) -> Outcome {
    let (mut p, mut q) = (p, q);
    let mut p_prime = primality::is_probable_prime(&p);
    if !p_prime && depth < params::MAX_RECURSION && deadline.check().is_ok() {
        let child = deadline.split(1, 2);
        if let Outcome::Factored(f) = classify(&p, &child, depth + 1, tools, tpool, settings) {
            trace.push(format!("split composite factor {p} = {} * {}", f.p, f.q));
            trace.extend(f.trace);
            // Prefer reporting a prime divisor.
            let better = if f.p_prime {
                Some(f.p)
            } else if f.q_prime {
                Some(f.q)
            } else {
                None
            };
            if let Some(b) = better {
                p = b;
                q = *n / b;
            }
            p_prime = primality::is_probable_prime(&p);
        }
    }
    let mut q_prime = primality::is_probable_prime(&q);
    if !q_prime && depth < params::MAX_RECURSION && deadline.check().is_ok() {
        let child = deadline.split(1, 2);
        match classify(&q, &child, depth + 1, tools, tpool, settings) {
            Outcome::Factored(f) => {
                trace.push(format!("cofactor {q} splits as {} * {}", f.p, f.q));
                trace.extend(f.trace);
            }
            _ => trace.push(format!("cofactor {q} left unclassified")),
        }
    }
    if p > q {
        std::mem::swap(&mut p, &mut q);
        std::mem::swap(&mut p_prime, &mut q_prime);
    }
    debug_assert!(p * q == *n);
    Outcome::Factored(Factored {
        p,
        q,
        method,
        p_prime,
        q_prime,
        trace,
    })
}

fn exhausted(mut trace: Vec<String>, deadline: &Deadline) -> Outcome {
    trace.push(if deadline.canceled() {
        "canceled".to_string()
    } else {
        "no factor found within budget".to_string()
    });
    Outcome::Exhausted { trace }
}

fn remaining_budget_iters(deadline: &Deadline) -> u64 {
    if let Some(it) = deadline.remaining_iters() {
        return it;
    }
    if let Some(ms) = deadline.remaining_ms() {
        return ms.saturating_mul(params::MULTS_PER_MS);
    }
    u64::MAX
}

fn trial_divide(n: &Uint, limit: u64, deadline: &Deadline) -> Option<u64> {
    let small = n.bits() <= 63;
    let n64 = n.digits()[0];
    let mut sieve = PrimeSieve::new();
    loop {
        let block = sieve.next();
        if block.is_empty() {
            return None;
        }
        for &p in block {
            let p = p as u64;
            if p > limit {
                return None;
            }
            if small && p.saturating_mul(p) > n64 {
                // No divisor up to sqrt(n): nothing left to find here.
                return None;
            }
            if arith::mod_u64(n, p) == 0 {
                return Some(p);
            }
        }
        if deadline.tick(block.len() as u64).is_err() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn run(n: &str, iters: u64) -> Outcome {
        let n = Uint::from_str(n).unwrap();
        let d = Deadline::new(None, Some(iters));
        factor(&n, &d, &Tools::none(), None, &Settings::default())
    }

    #[test]
    fn test_prime_input() {
        let out = run("2305843009213693951", 1_000_000);
        assert!(matches!(out, Outcome::Prime { .. }));
    }

    #[test]
    fn test_fermat_path_with_tiny_budget() {
        // 8051 = 83 * 97. With 2000 iterations the trial limit scales
        // down to 64 < 83, so the near-square search gets the hit at
        // a = 90 (90^2 - 8051 = 7^2).
        let out = run("8051", 2_000);
        let Outcome::Factored(f) = out else {
            panic!("expected factorization, got {out:?}")
        };
        assert_eq!(f.p, Uint::from_digit(83));
        assert_eq!(f.q, Uint::from_digit(97));
        assert_eq!(f.method, "fermat");
        assert!(f.trace.iter().any(|s| s.starts_with("fermat found")));
        assert!(f.trace.iter().all(|s| !s.starts_with("rho")));
        assert!(f.p_prime && f.q_prime);
    }

    #[test]
    fn test_trial_path_with_large_budget() {
        // Same input, bigger budget: the sieve reaches 83 first.
        let out = run("8051", 500_000);
        let Outcome::Factored(f) = out else {
            panic!("expected factorization")
        };
        assert_eq!((f.p, f.q), (Uint::from_digit(83), Uint::from_digit(97)));
        assert_eq!(f.method, "trial");
    }

    #[test]
    fn test_budget_exhaustion_terminates() {
        // (2^89-1)(2^107-1): no small factor, no near-square
        // structure, and the budget is far too small for rho or ECM.
        let p = Uint::from_str("618970019642690137449562111").unwrap();
        let q = Uint::from_str("162259276829213363391578010288127").unwrap();
        let n = p * q;
        let d = Deadline::new(None, Some(100_000));
        let out = factor(&n, &d, &Tools::none(), None, &Settings::default());
        assert!(matches!(out, Outcome::Exhausted { .. }), "got {out:?}");
        // Within the budget plus at most one stage's batch overrun.
        assert!(d.iters() < 130_000, "consumed {}", d.iters());
    }

    #[test]
    fn test_round_trip_various() {
        for (n, iters, semiprime) in [
            ("8633", 500_000_u64, true),           // 89 * 97, trial
            ("1000036000099", 10_000_000, true),   // 1000003 * 1000033, fermat
            ("235075827453629", 5_000_000, false), // 48-bit composite
        ] {
            let nn = Uint::from_str(n).unwrap();
            let out = run(n, iters);
            let Outcome::Factored(f) = out else {
                panic!("failed to factor {n}: {out:?}")
            };
            assert_eq!(f.p * f.q, nn, "{n}");
            assert!(f.p > Uint::ONE && f.p <= f.q);
            if semiprime {
                assert!(f.p_prime && f.q_prime, "{n}");
            }
        }
    }

    #[test]
    fn test_multi_factor_recursion() {
        // 2 * 3 * 5 * 1000003: trial peels 2, the composite cofactor
        // is classified recursively and reported with its flag.
        let out = run("30000090", 1_000_000);
        let Outcome::Factored(f) = out else {
            panic!("expected factorization")
        };
        assert_eq!(f.p * f.q, Uint::from_digit(30000090));
        assert_eq!(f.p, Uint::from_digit(2));
        assert!(f.p_prime);
        assert!(!f.q_prime);
        assert!(f.trace.iter().any(|s| s.contains("cofactor")));
    }

    #[test]
    fn test_rho_only_strategy() {
        let n = Uint::from_str("1000036000099").unwrap();
        let d = Deadline::new(None, Some(20_000_000));
        let settings = Settings {
            strategy: Strategy::RhoOnly,
            ..Settings::default()
        };
        let out = factor(&n, &d, &Tools::none(), None, &settings);
        let Outcome::Factored(f) = out else {
            panic!("expected factorization")
        };
        assert_eq!(f.p * f.q, n);
        assert_eq!(f.method, "rho");
    }

    #[test]
    fn test_validate_rejects_mismatch() {
        let n = Uint::from_digit(8051);
        assert_eq!(validate(&n, &Uint::from_digit(84)), None);
        assert_eq!(validate(&n, &Uint::ONE), None);
        assert_eq!(validate(&n, &n), None);
        assert_eq!(
            validate(&n, &Uint::from_digit(83)),
            Some((Uint::from_digit(83), Uint::from_digit(97)))
        );
    }
}
