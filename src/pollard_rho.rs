// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Pollard's rho with Brent cycle detection and batched GCD.
//!
//! The hare walks y -> y^2 + c; differences against the tortoise
//! checkpoint are multiplied into a running product and a single GCD
//! is taken per batch of 256 steps. When the batched GCD collapses to
//! n (several collisions inside one batch), single-stepping from the
//! last checkpoint isolates the factor.
//!
//! This is the general purpose fallback of the cascade: expected cost
//! around O(n^1/4) with no hard success bound, so every loop polls
//! the shared deadline at batch boundaries and gives up cleanly.
//!
//! References:
//! J.M. Pollard, A Monte Carlo method for factorization, 1975
//! R.P. Brent, An improved Monte Carlo factorization algorithm, 1980

use std::cmp::min;
use std::sync::atomic::{AtomicBool, Ordering};

use num_integer::Integer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::arith_montgomery::{mg_2adic_inv, mg_mul, MInt, ZmodN};
use crate::deadline::Deadline;
use crate::params::{self, RHO_BATCH};
use crate::Uint;

/// Rho for word-sized n using Brent's interval scheme: the tortoise
/// only moves at power-of-two indices and comparisons happen in the
/// upper half of each interval.
pub fn rho64(n: u64, seed: u64, c: u64, iters: u64, deadline: &Deadline) -> Option<(u64, u64)> {
    debug_assert!(n % 2 == 1 && n > 3);
    let ninv = mg_2adic_inv(n);
    let c = c % n;
    // Iterate x => x^2 + c on the Montgomery representation.
    // Invariants: x1 = f^e1(seed), x2 = f^e2(seed)
    // with 3/2 e1 <= e2 <= 2 e1 - 1.
    let (mut x1, mut x2) = (seed % n, seed % n);
    let mut prod = 1_u64;
    let mut next_interval_start = 0;
    let mut next_interval_end = 1;
    for e2 in 1..iters {
        x2 = mg_mul(n, ninv, x2, x2) + c;
        if x2 >= n {
            x2 -= n;
        }
        if e2 < next_interval_start {
            continue;
        }
        // We are in the comparison interval.
        prod = mg_mul(n, ninv, prod, x1.abs_diff(x2));

        if e2 == next_interval_end {
            x1 = x2;
            // Next interval is (2^k + 2^(k-1), 2^(k+1) - 1).
            let pow2k = e2 + 1;
            debug_assert!(pow2k & (pow2k - 1) == 0);
            next_interval_start = pow2k + pow2k / 2;
            next_interval_end = 2 * pow2k - 1;
        }

        if e2 % 128 == 127 {
            if deadline.tick(128).is_err() {
                return None;
            }
            let d = Integer::gcd(&n, &prod);
            if d > 1 && d < n {
                return Some((d, n / d));
            }
        }
    }
    let d = Integer::gcd(&n, &prod);
    if d > 1 && d < n {
        return Some((d, n / d));
    }
    None
}

#[inline]
fn step(zn: &ZmodN, y: &MInt, c: &MInt) -> MInt {
    zn.add(&zn.mul(y, y), c)
}

/// One multiprecision rho attempt for a fixed (seed, c) pair.
/// Deterministic: the same pair always walks the same sequence.
pub fn rho(
    n: &Uint,
    seed: u64,
    c: u64,
    max_iters: u64,
    deadline: &Deadline,
    stop: Option<&AtomicBool>,
) -> Option<(Uint, Uint)> {
    let zn = ZmodN::new(*n);
    let cc = zn.from_int(Uint::from_digit(c));
    let mut y = zn.from_int(Uint::from_digit(seed));
    let mut x = y;
    let mut ys = y;
    let mut q = zn.one();
    let mut g = Uint::ONE;
    let mut r: u64 = 1;
    let mut count: u64 = 0;
    let m = RHO_BATCH;
    'outer: while g == Uint::ONE && count < max_iters {
        x = y;
        // Brent doubling: move the checkpoint r steps ahead.
        let mut skipped = 0;
        while skipped < r {
            let chunk = min(m, r - skipped);
            for _ in 0..chunk {
                y = step(&zn, &y, &cc);
            }
            skipped += chunk;
            count += chunk;
            if deadline.tick(chunk).is_err() {
                break 'outer;
            }
            if stop.map_or(false, |s| s.load(Ordering::Relaxed)) {
                return None;
            }
        }
        // Compare the next r positions against the checkpoint,
        // one GCD per batch of m differences.
        let mut k = 0;
        while k < r && g == Uint::ONE {
            ys = y;
            let chunk = min(m, r - k);
            for _ in 0..chunk {
                y = step(&zn, &y, &cc);
                q = zn.mul(&q, &zn.sub(&x, &y));
            }
            count += chunk;
            // gcd(qR mod n, n) = gcd(q, n) since R is a unit.
            g = Integer::gcd(n, &q.0);
            k += m;
            if deadline.tick(chunk).is_err() {
                break 'outer;
            }
            if stop.map_or(false, |s| s.load(Ordering::Relaxed)) {
                return None;
            }
        }
        r <<= 1;
    }
    if g == Uint::ONE {
        g = Integer::gcd(n, &q.0);
    }
    if g == *n {
        // More than one collision inside the batch: single-step from
        // the last checkpoint to isolate the factor.
        g = Uint::ONE;
        for _ in 0..2 * m {
            ys = step(&zn, &ys, &cc);
            g = Integer::gcd(n, &zn.sub(&x, &ys).0);
            if g > Uint::ONE {
                break;
            }
        }
    }
    if g > Uint::ONE && g < *n {
        Some((g, *n / g))
    } else {
        None
    }
}

/// Races several independent (seed, c) attempts, winner take all.
/// Losing attempts observe the stop flag at their next batch
/// boundary and discard their partial state.
pub fn rho_race(
    n: &Uint,
    base_seed: u64,
    round_iters: u64,
    instances: usize,
    deadline: &Deadline,
    tpool: Option<&rayon::ThreadPool>,
) -> Option<(Uint, Uint)> {
    let stop = AtomicBool::new(false);
    let attempt = |i: usize| -> Option<(Uint, Uint)> {
        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
        let seed = rng.gen_range(2_u64..1 << 62);
        let c = rng.gen_range(1_u64..1 << 62) | 1;
        let res = rho(n, seed, c, round_iters, deadline, Some(&stop));
        if res.is_some() {
            stop.store(true, Ordering::Relaxed);
        }
        res
    };
    match tpool {
        Some(pool) => pool.install(|| (0..instances).into_par_iter().find_map_any(attempt)),
        None => (0..instances).find_map(attempt),
    }
}

/// Repeated rho64 attempts with varying pairs, for 64-bit inputs.
pub fn rho64_rounds(n: u64, base_seed: u64, deadline: &Deadline) -> Option<(u64, u64)> {
    let bits = u64::BITS - n.leading_zeros();
    let iters = params::rho_round_iters(bits);
    let mut rng = StdRng::seed_from_u64(base_seed);
    loop {
        let seed = rng.gen_range(2..n - 1);
        let c = rng.gen_range(1..n - 1) | 1;
        if let Some(pq) = rho64(n, seed, c, iters, deadline) {
            return Some(pq);
        }
        if deadline.check().is_err() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_rho64_basic() {
        let d = Deadline::unlimited();
        let ns: &[u64] = &[
            235075827453629,
            166130059616737,
            159247921097933,
            224077614412439,
            219669028971857,
        ];
        'nextn: for &n in ns {
            for budget in [500, 1000, 2000, 4000, 7000, 10000, 20000, 60000] {
                if let Some((p, q)) = rho64(n, 2, 1, budget, &d) {
                    assert_eq!(p * q, n);
                    continue 'nextn;
                }
                if let Some((p, q)) = rho64(n, 3, 1, budget, &d) {
                    assert_eq!(p * q, n);
                    continue 'nextn;
                }
            }
            panic!("failed to factor {n}");
        }
    }

    #[test]
    fn test_rho_multiprecision() {
        // 1000003 * 1000033, walked through the big-integer path.
        let n = Uint::from_str("1000036000099").unwrap();
        let d = Deadline::unlimited();
        let (p, q) = rho(&n, 2, 1, 500_000, &d, None).unwrap();
        assert_eq!(p * q, n);
        assert!(p > Uint::ONE && q > Uint::ONE);
    }

    #[test]
    fn test_rho_reproducible() {
        // A fixed (seed, c) pair must produce the identical trace.
        let n = Uint::from_str("1000036000099").unwrap();
        let d1 = Deadline::unlimited();
        let r1 = rho(&n, 7, 11, 500_000, &d1, None);
        let d2 = Deadline::unlimited();
        let r2 = rho(&n, 7, 11, 500_000, &d2, None);
        assert_eq!(r1, r2);
        assert_eq!(d1.iters(), d2.iters());
        assert!(r1.is_some());
    }

    #[test]
    fn test_rho_respects_deadline() {
        // A strong 196-bit semiprime: rho cannot succeed within
        // 20000 iterations, but it must stop on time.
        let p = Uint::from_str("618970019642690137449562111").unwrap(); // 2^89-1
        let q = Uint::from_str("162259276829213363391578010288127").unwrap(); // 2^107-1
        let n = p * q;
        let d = Deadline::new(None, Some(20_000));
        assert_eq!(rho(&n, 2, 1, u64::MAX, &d, None), None);
        assert!(d.iters() <= 21_000);
    }

    #[test]
    fn test_rho_race_finds_factor() {
        let n = Uint::from_str("1000036000099").unwrap();
        let d = Deadline::unlimited();
        let res = rho_race(&n, 1234, 500_000, 2, &d, None);
        let (p, q) = res.unwrap();
        assert_eq!(p * q, n);
    }
}
