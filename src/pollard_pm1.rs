// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Pollard's P-1 method, two stages.
//!
//! Stage 1 raises a base to the product of all prime powers below B1
//! and looks for gcd(a^E - 1, n): it succeeds when p-1 is B1-smooth
//! for some prime factor p. Stage 2 extends the reach to p-1 with a
//! single extra prime factor up to B2, walking the primes by their
//! gaps so that each step costs one multiplication.
//!
//! GCDs are batched: every few dozen primes in stage 1, every 64
//! primes in stage 2. The shared deadline is polled at the same
//! boundaries.

use num_integer::Integer;

use crate::arith_montgomery::ZmodN;
use crate::deadline::Deadline;
use crate::fbase::PrimeSieve;
use crate::{Uint, Verbosity};

pub fn pm1(
    n: &Uint,
    b1: u64,
    b2: u64,
    deadline: &Deadline,
    verbosity: Verbosity,
) -> Option<(Uint, Uint)> {
    assert!(b1 > 3);
    let start = std::time::Instant::now();
    let zn = ZmodN::new(*n);
    let one = zn.one();

    // Stage 1
    let mut g = zn.from_int(Uint::from_digit(2));
    let mut p_prev: u64 = 2;
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
            g = zn.pow_u64(&g, pow);
            p_prev = p;
            since_gcd += 1;
            if since_gcd == 32 {
                since_gcd = 0;
                if deadline.tick(64 * 32).is_err() {
                    return None;
                }
                if let Some(d) = gcd_check(n, &zn.sub(&g, &one).0) {
                    return found(n, d, 1, b1, b2, start, verbosity);
                }
            }
        }
        if deadline.tick(64 * since_gcd).is_err() {
            return None;
        }
        if let Some(d) = gcd_check(n, &zn.sub(&g, &one).0) {
            return found(n, d, 1, b1, b2, start, verbosity);
        }
    }

    // Stage 2
    if b2 <= b1 {
        return None;
    }
    // gaps[i] = g^(2i+2); consecutive odd primes differ by an even gap.
    let g2 = zn.mul(&g, &g);
    let mut gaps = vec![g2];
    let mut x = zn.pow_u64(&g, p_prev);
    let mut product = zn.sub(&x, &one);
    let mut sieve = PrimeSieve::new();
    let mut done = false;
    let mut since_gcd = 0_u64;
    while !done {
        let block = sieve.next();
        if block.is_empty() {
            break;
        }
        for &p in block {
            let p = p as u64;
            if p <= p_prev {
                continue;
            }
            if p > b2 {
                done = true;
                break;
            }
            let gap = (p - p_prev) as usize;
            while gaps.len() < gap / 2 {
                gaps.push(zn.mul(gaps.last().unwrap(), &g2));
            }
            x = zn.mul(&x, &gaps[gap / 2 - 1]);
            product = zn.mul(&product, &zn.sub(&x, &one));
            p_prev = p;
            since_gcd += 1;
            if since_gcd == 64 {
                since_gcd = 0;
                if deadline.tick(128).is_err() {
                    return None;
                }
                if let Some(d) = gcd_check(n, &product.0) {
                    return found(n, d, 2, b1, b2, start, verbosity);
                }
            }
        }
    }
    if let Some(d) = gcd_check(n, &product.0) {
        return found(n, d, 2, b1, b2, start, verbosity);
    }
    None
}

/// A nontrivial divisor, or None when the gcd is 1 or n (the latter
/// means every factor was hit at once and cannot be separated).
fn gcd_check(n: &Uint, value: &Uint) -> Option<Uint> {
    let d = Integer::gcd(n, value);
    if d > Uint::ONE && d < *n {
        Some(d)
    } else {
        None
    }
}

fn found(
    n: &Uint,
    d: Uint,
    stage: u32,
    b1: u64,
    b2: u64,
    start: std::time::Instant,
    verbosity: Verbosity,
) -> Option<(Uint, Uint)> {
    if verbosity >= Verbosity::Info {
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        eprintln!("Found factor {d} with P-1 stage {stage} (B1={b1} B2={b2}) in {ms:.1}ms");
    }
    Some((d, *n / d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_pm1_basic() {
        let d = Deadline::unlimited();
        let v = Verbosity::Silent;
        // 64-bit semiprimes whose p-1 is smooth apart from one
        // moderate prime (467 ... 29129).
        let ns: &[u64] = &[
            235075827453629,
            166130059616737,
            159247921097933,
            224077614412439,
            219669028971857,
        ];
        for &n in ns {
            let n = Uint::from_digit(n);
            let (p, q) = pm1(&n, 1_000, 200_000, &d, v).expect("factor");
            assert_eq!(p * q, n);
            assert!(p > Uint::ONE && q > Uint::ONE);
        }
    }

    #[test]
    fn test_pm1_uint() {
        let d = Deadline::unlimited();
        let v = Verbosity::Silent;
        // p-1 = 2 * 5 * 29 * 89 * 211 * 433 * 823 * 1669 * 4013 * 7717 * 416873
        let p128 = Uint::from_str("41815371135748981224332082131").unwrap();
        // A 256-bit strong prime
        let p256 = Uint::from_str(
            "92504863121296400653652753711376140294298584431452956354291724864471735145079",
        )
        .unwrap();
        let n = p128 * p256;
        let (p, q) = pm1(&n, 30_000, 450_000, &d, v).expect("factor");
        assert_eq!(p, p128);
        assert_eq!(q, p256);
    }

    #[test]
    fn test_pm1_miss() {
        // Mersenne semiprime: p-1 = 2 (2^88 - 1) contains the prime
        // 2931542417, far beyond B2.
        let p = Uint::from_str("618970019642690137449562111").unwrap();
        let q = Uint::from_str("162259276829213363391578010288127").unwrap();
        let d = Deadline::unlimited();
        assert_eq!(pm1(&(p * q), 2_000, 60_000, &d, Verbosity::Silent), None);
    }

    #[test]
    fn test_pm1_deadline() {
        let p = Uint::from_str("618970019642690137449562111").unwrap();
        let q = Uint::from_str("162259276829213363391578010288127").unwrap();
        let d = Deadline::new(None, Some(100));
        assert_eq!(pm1(&(p * q), 100_000, 3_000_000, &d, Verbosity::Silent), None);
        // Interrupted almost immediately.
        assert!(d.iters() < 10_000);
    }
}
