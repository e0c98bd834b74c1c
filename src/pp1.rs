// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Williams P+1 method.
//!
//! Works on the conic xy = 1 through its u = x + y coordinate, which
//! supports doubling u(2P) = u(P)^2 - 2 and the differential addition
//! u(P+Q) = u(P) u(Q) - u(P-Q). When u0^2 - 4 is a non-residue
//! modulo a prime factor p, scalar multiplication runs in the
//! quadratic twist of order p+1, hence factors appear when p+1 is
//! smooth. Several seeds are tried since the twist condition cannot
//! be checked without knowing p.
//!
//! This is a distinct algorithm from P-1 (not a rebound with other
//! bounds): stage 1 exponentiates through binary Lucas chains, and
//! stage 2 is a baby-step giant-step product over V values modulo
//! d1 = 210.

use num_integer::Integer;

use crate::arith_montgomery::{MInt, ZmodN};
use crate::deadline::Deadline;
use crate::fbase::PrimeSieve;
use crate::{Uint, Verbosity};

const D1: u64 = 210;

pub fn pp1(
    n: &Uint,
    seed: u64,
    b1: u64,
    b2: u64,
    deadline: &Deadline,
    verbosity: Verbosity,
) -> Option<(Uint, Uint)> {
    assert!(b1 > 3);
    let start = std::time::Instant::now();
    let zn = ZmodN::new(*n);
    let two = zn.from_int(Uint::from_digit(2));
    let mut g = zn.from_int(Uint::from_digit(seed));

    // Stage 1: g <- V_E(g) for E the product of prime powers <= b1.
    let mut sieve = PrimeSieve::new();
    let mut done = false;
    while !done {
        let block = sieve.next();
        if block.is_empty() {
            break;
        }
        let mut since_gcd = 0_u64;
        for &p in block {
            let p = p as u64;
            if p > b1 {
                done = true;
                break;
            }
            let mut pow = p;
            while pow * p <= b1 {
                pow *= p;
            }
            g = lucas_chain(&zn, &g, pow, &two);
            since_gcd += 1;
            if since_gcd == 32 {
                since_gcd = 0;
                if deadline.tick(128 * 32).is_err() {
                    return None;
                }
                if g == two {
                    // The whole group collapsed: gcd would be n.
                    return None;
                }
                if let Some(d) = gcd_check(n, &zn.sub(&g, &two).0) {
                    return found(n, d, 1, seed, b1, b2, start, verbosity);
                }
            }
        }
        if deadline.tick(128 * since_gcd).is_err() {
            return None;
        }
        if g == two {
            return None;
        }
        if let Some(d) = gcd_check(n, &zn.sub(&g, &two).0) {
            return found(n, d, 1, seed, b1, b2, start, verbosity);
        }
    }

    // Stage 2: look for a remaining prime order l in (b1, b2].
    // Writing l = i*D1 +- j with gcd(j, D1) = 1, V(i*D1) = V(j)
    // modulo the hidden factor, so we accumulate the product of
    // V(i*D1) - V(j) over the range.
    if b2 <= b1 {
        return None;
    }
    let g2 = lucas_chain(&zn, &g, 2, &two);
    // Baby steps V(j) for odd j < D1/2 coprime to D1 (24 values).
    let mut babies = Vec::with_capacity(24);
    let (mut prev, mut cur) = (g, g); // V(-1), V(1)
    let mut j = 1_u64;
    loop {
        if j % 3 != 0 && j % 5 != 0 && j % 7 != 0 {
            babies.push(cur);
        }
        if j + 2 > D1 / 2 {
            break;
        }
        // V(j+2) = V(j) V(2) - V(j-2)
        (prev, cur) = (cur, zn.sub(&zn.mul(&cur, &g2), &prev));
        j += 2;
    }
    // Giant steps V(i*D1), three-term recurrence.
    let vd1 = lucas_chain(&zn, &g, D1, &two);
    let i_min = std::cmp::max(1, b1 / D1);
    let i_max = b2 / D1 + 1;
    let mut product = zn.one();
    let (mut vprev, mut vcur) = (two, vd1); // V(0), V(D1)
    let mut rows = 0_u64;
    for i in 1..=i_max {
        if i >= i_min {
            for vb in &babies {
                product = zn.mul(&product, &zn.sub(&vcur, vb));
            }
            rows += 1;
            if rows % 8 == 0 {
                if deadline.tick(8 * 26).is_err() {
                    return None;
                }
                if let Some(d) = gcd_check(n, &product.0) {
                    return found(n, d, 2, seed, b1, b2, start, verbosity);
                }
            }
        }
        (vprev, vcur) = (vcur, zn.sub(&zn.mul(&vcur, &vd1), &vprev));
    }
    if let Some(d) = gcd_check(n, &product.0) {
        return found(n, d, 2, seed, b1, b2, start, verbosity);
    }
    None
}

/// V_exp(g) through the simple binary Lucas chain: 2nP by doubling
/// nP, (2n+1)P by adding nP and (n+1)P. Two multiplications per
/// exponent bit.
fn lucas_chain(zn: &ZmodN, g: &MInt, exp: u64, two: &MInt) -> MInt {
    if exp == 0 {
        return *two;
    }
    // Compute (kP, (k+1)P) for the successive prefixes k of exp.
    let mut p_k = *two; // V(0)
    let mut p_k1 = *g; // V(1)
    let expbits = u64::BITS - exp.leading_zeros();
    for i in 1..expbits {
        let k = exp >> (expbits - i);
        if k % 2 == 0 {
            // (k, k+1) => (2k, 2k+1)
            (p_k, p_k1) = (
                zn.sub(&zn.mul(&p_k, &p_k), two),
                zn.sub(&zn.mul(&p_k, &p_k1), g),
            );
        } else {
            // (k, k+1) => (2k+1, 2k+2)
            (p_k, p_k1) = (
                zn.sub(&zn.mul(&p_k, &p_k1), g),
                zn.sub(&zn.mul(&p_k1, &p_k1), two),
            );
        }
    }
    // Last step does not need exp+1.
    if exp % 2 == 0 {
        zn.sub(&zn.mul(&p_k, &p_k), two)
    } else {
        zn.sub(&zn.mul(&p_k, &p_k1), g)
    }
}

fn gcd_check(n: &Uint, value: &Uint) -> Option<Uint> {
    let d = Integer::gcd(n, value);
    if d > Uint::ONE && d < *n {
        Some(d)
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn found(
    n: &Uint,
    d: Uint,
    stage: u32,
    seed: u64,
    b1: u64,
    b2: u64,
    start: std::time::Instant,
    verbosity: Verbosity,
) -> Option<(Uint, Uint)> {
    if verbosity >= Verbosity::Info {
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        eprintln!(
            "Found factor {d} with P+1 stage {stage} (seed={seed} B1={b1} B2={b2}) in {ms:.1}ms"
        );
    }
    Some((d, *n / d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_lucas_chain() {
        // Modulo the prime 2^22 3^15 - 1, the seed 3 has order p+1
        // on the twist (5 = 3^2 - 4 is a non-residue).
        let p: u64 = 60183678025727;
        let zn = ZmodN::new(Uint::from_digit(p));
        let two = zn.from_int(Uint::from_digit(2));
        let g = zn.from_int(Uint::from_digit(3));
        // V(p+1) = 2, V(p-1) != 2
        assert_eq!(lucas_chain(&zn, &g, p + 1, &two), two);
        assert!(lucas_chain(&zn, &g, p - 1, &two) != two);
        // V(2k) consistency: V(2) = V(1)^2 - 2
        let v2 = lucas_chain(&zn, &g, 2, &two);
        assert_eq!(v2, zn.sub(&zn.mul(&g, &g), &two));
    }

    #[test]
    fn test_pp1_stage1() {
        let d = Deadline::unlimited();
        let v = Verbosity::Silent;
        // p + 1 = 2 * 3 * 5 * 7 * 43 * 349 * 1303 is 1500-smooth and
        // 9^2 - 4 is a non-residue mod p.
        let p = Uint::from_digit(4106365409);
        let p128 = Uint::from_str("192361420203955321314102766284003105319").unwrap();
        let n = p * p128;
        let (a, b) = pp1(&n, 9, 1_500, 30_000, &d, v).expect("factor");
        assert_eq!(a, p);
        assert_eq!(b, p128);
        // The seed 5 lands in the untwisted group where the order is
        // not smooth.
        assert_eq!(pp1(&n, 5, 1_500, 30_000, &d, v), None);
    }

    #[test]
    fn test_pp1_stage2() {
        let d = Deadline::unlimited();
        let v = Verbosity::Silent;
        // Same p: with B1 = 500 the factor 1303 is out of stage 1
        // reach and must be found by the BSGS continuation.
        let p = Uint::from_digit(4106365409);
        let p128 = Uint::from_str("192361420203955321314102766284003105319").unwrap();
        let n = p * p128;
        let (a, b) = pp1(&n, 9, 500, 2_000, &d, v).expect("factor");
        assert_eq!(a, p);
        assert_eq!(b, p128);
    }
}
