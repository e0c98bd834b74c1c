// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Elliptic curve method, stage 1 only.
//!
//! Draws random short-Weierstrass curves y^2 = x^3 + ax + b over
//! Z/nZ through a random point and multiplies the point by the
//! product of prime powers below B1, in Jacobian coordinates so that
//! no inversion modulo n is ever needed. Over a ring the group law
//! can "fail": any intermediate Z coordinate sharing a nontrivial
//! divisor with n is exactly the factor we are looking for, as is a
//! degenerate discriminant. GCDs are batched per exponent chunk, not
//! per bit.
//!
//! Deep second stages are deliberately absent: inputs needing them
//! are handed to the external GMP-ECM binary when present.
//!
//! References:
//! H.W. Lenstra, Factoring integers with elliptic curves, 1987
//! https://en.wikipedia.org/wiki/Lenstra_elliptic-curve_factorization

use std::sync::atomic::{AtomicBool, Ordering};

use num_integer::Integer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::arith_montgomery::{MInt, ZmodN};
use crate::deadline::Deadline;
use crate::fbase;
use crate::{Uint, Verbosity};

/// An exponent base for ECM stage 1: prime powers below B1 packed
/// into u32 chunks.
pub struct SmoothBase {
    factors: Box<[u32]>,
}

impl SmoothBase {
    pub fn new(b1: u64) -> Self {
        let primes = fbase::primes(b1 as u32 / 2);
        let mut factors = vec![];
        let mut buffer = 1_u64;
        for p in primes {
            let p = p as u64;
            if p > b1 {
                break;
            }
            // Small primes are raised to some power (until B1).
            let mut pow = p;
            while pow * p <= b1 {
                pow *= p;
            }
            if buffer * pow >= 1 << 32 {
                factors.push(buffer as u32);
                buffer = 1;
            }
            buffer *= pow;
        }
        if buffer > 1 {
            factors.push(buffer as u32);
        }
        SmoothBase {
            factors: factors.into_boxed_slice(),
        }
    }
}

/// A point in Jacobian coordinates (x/z^2, y/z^3).
#[derive(Clone)]
struct Point {
    x: MInt,
    y: MInt,
    z: MInt,
}

struct Curve<'a> {
    zn: &'a ZmodN,
    a: MInt,
}

impl<'a> Curve<'a> {
    fn infinity(&self) -> Point {
        Point {
            x: self.zn.zero(),
            y: self.zn.one(),
            z: self.zn.zero(),
        }
    }

    // Doubling: S = 4XY^2, M = 3X^2 + aZ^4,
    // X' = M^2 - 2S, Y' = M(S - X') - 8Y^4, Z' = 2YZ.
    fn double(&self, p: &Point) -> Point {
        let zn = self.zn;
        if p.y == zn.zero() || p.z == zn.zero() {
            return self.infinity();
        }
        let y2 = zn.mul(&p.y, &p.y);
        let xy2 = zn.mul(&p.x, &y2);
        let s = zn.add(&zn.add(&xy2, &xy2), &zn.add(&xy2, &xy2));
        let x2 = zn.mul(&p.x, &p.x);
        let z2 = zn.mul(&p.z, &p.z);
        let z4 = zn.mul(&z2, &z2);
        let m = zn.add(&zn.add(&zn.add(&x2, &x2), &x2), &zn.mul(&self.a, &z4));
        let x3 = zn.sub(&zn.sub(&zn.mul(&m, &m), &s), &s);
        let y4 = zn.mul(&y2, &y2);
        let mut y8 = zn.add(&y4, &y4);
        y8 = zn.add(&y8, &y8);
        y8 = zn.add(&y8, &y8);
        let y3 = zn.sub(&zn.mul(&m, &zn.sub(&s, &x3)), &y8);
        let z3 = {
            let yz = zn.mul(&p.y, &p.z);
            zn.add(&yz, &yz)
        };
        Point { x: x3, y: y3, z: z3 }
    }

    // General addition; exact ring equality of the U coordinates
    // degrades to doubling or infinity, partial (mod p) collisions
    // flow through the formulas and surface in gcd(Z, n).
    fn add(&self, p: &Point, q: &Point) -> Point {
        let zn = self.zn;
        if p.z == zn.zero() {
            return q.clone();
        }
        if q.z == zn.zero() {
            return p.clone();
        }
        let z1z1 = zn.mul(&p.z, &p.z);
        let z2z2 = zn.mul(&q.z, &q.z);
        let u1 = zn.mul(&p.x, &z2z2);
        let u2 = zn.mul(&q.x, &z1z1);
        let s1 = zn.mul(&zn.mul(&p.y, &q.z), &z2z2);
        let s2 = zn.mul(&zn.mul(&q.y, &p.z), &z1z1);
        if u1 == u2 {
            if s1 == s2 {
                return self.double(p);
            }
            return self.infinity();
        }
        let h = zn.sub(&u2, &u1);
        let r = zn.sub(&s2, &s1);
        let h2 = zn.mul(&h, &h);
        let h3 = zn.mul(&h2, &h);
        let u1h2 = zn.mul(&u1, &h2);
        let x3 = zn.sub(&zn.sub(&zn.mul(&r, &r), &h3), &zn.add(&u1h2, &u1h2));
        let y3 = zn.sub(&zn.mul(&r, &zn.sub(&u1h2, &x3)), &zn.mul(&s1, &h3));
        let z3 = zn.mul(&zn.mul(&p.z, &q.z), &h);
        Point { x: x3, y: y3, z: z3 }
    }

    fn scalar32(&self, k: u32, p: &Point) -> Point {
        let mut res = self.infinity();
        let mut sq = p.clone();
        let mut k = k;
        while k > 0 {
            if k & 1 == 1 {
                res = self.add(&res, &sq);
            }
            sq = self.double(&sq);
            k >>= 1;
        }
        res
    }
}

// Batched gcd checks happen once per chunk of packed exponents;
// this is the declared multiplication cost of one chunk.
const CHUNK_COST: u64 = 2_500;

/// Runs stage 1 on `curves` random curves. Curves race in parallel
/// when a thread pool is provided, winner take all.
pub fn ecm(
    n: &Uint,
    b1: u64,
    curves: u32,
    base_seed: u64,
    deadline: &Deadline,
    tpool: Option<&rayon::ThreadPool>,
    verbosity: Verbosity,
) -> Option<(Uint, Uint)> {
    let start = std::time::Instant::now();
    let zn = ZmodN::new(*n);
    let sb = SmoothBase::new(b1);
    let stop = AtomicBool::new(false);
    let attempt = |i: u32| -> Option<(Uint, Uint)> {
        if stop.load(Ordering::Relaxed) || deadline.check().is_err() {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
        let res = ecm_curve(&zn, &sb, &mut rng, deadline, &stop);
        if let Some(d) = res {
            stop.store(true, Ordering::Relaxed);
            if verbosity >= Verbosity::Info {
                let ms = start.elapsed().as_secs_f64() * 1000.0;
                eprintln!("Found factor {d} with ECM (B1={b1} curve {i}) in {ms:.1}ms");
            }
            return Some((d, *n / d));
        }
        None
    };
    match tpool {
        Some(pool) => pool.install(|| (0..curves).into_par_iter().find_map_any(attempt)),
        None => (0..curves).find_map(attempt),
    }
}

fn ecm_curve(
    zn: &ZmodN,
    sb: &SmoothBase,
    rng: &mut StdRng,
    deadline: &Deadline,
    stop: &AtomicBool,
) -> Option<Uint> {
    let n = &zn.n;
    // Random curve through a random affine point: b is determined by
    // (x, y, a) and never needed beyond the discriminant.
    let x = random_mint(zn, rng);
    let y = random_mint(zn, rng);
    let a = zn.from_int(Uint::from_digit(1 + rng.gen::<u32>() as u64));
    let y2 = zn.mul(&y, &y);
    let x3 = zn.mul(&zn.mul(&x, &x), &x);
    let b = zn.sub(&zn.sub(&y2, &x3), &zn.mul(&a, &x));
    // disc = 4a^3 + 27b^2: a degenerate curve modulo one factor only
    // is already a split.
    let disc = {
        let a3 = zn.mul(&zn.mul(&a, &a), &a);
        let mut d4 = zn.add(&a3, &a3);
        d4 = zn.add(&d4, &d4);
        let b2 = zn.mul(&b, &b);
        let t2 = zn.add(&b2, &b2);
        let t4 = zn.add(&t2, &t2);
        let t8 = zn.add(&t4, &t4);
        let t16 = zn.add(&t8, &t8);
        // 27 = 16 + 8 + 2 + 1
        zn.add(&d4, &zn.add(&zn.add(&t16, &t8), &zn.add(&t2, &b2)))
    };
    let g = Integer::gcd(n, &disc.0);
    if g == *n {
        // Degenerate modulo every factor: useless curve.
        return None;
    }
    if g > Uint::ONE {
        return Some(g);
    }

    let curve = Curve { zn, a };
    let mut p = Point {
        x,
        y,
        z: zn.one(),
    };
    for chunk in sb.factors.chunks(4) {
        for &f in chunk {
            p = curve.scalar32(f, &p);
        }
        if deadline.tick(CHUNK_COST).is_err() || stop.load(Ordering::Relaxed) {
            return None;
        }
        let g = Integer::gcd(n, &p.z.0);
        if g == *n {
            // The point died modulo every factor at once.
            return None;
        }
        if g > Uint::ONE {
            return Some(g);
        }
    }
    None
}

fn random_mint(zn: &ZmodN, rng: &mut StdRng) -> MInt {
    let mut digits = [0_u64; Uint::BITS as usize / 64];
    for d in digits.iter_mut().take(8) {
        *d = rng.gen();
    }
    zn.from_int(Uint::from_digits(digits) % zn.n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_base() {
        let sb = SmoothBase::new(100);
        // Product of all packed chunks = product of prime powers <= 100.
        let mut prod = 1_u128;
        for &f in sb.factors.iter() {
            prod *= f as u128;
        }
        // 64 * 81 * 25 * 49 * 11 * 13 * ... * 97
        assert!(prod % 64 == 0 && prod % 81 == 0 && prod % 25 == 0 && prod % 49 == 0);
        assert!(prod % 97 == 0 && prod % 101 != 0);
    }

    #[test]
    fn test_ecm_small_factor() {
        // 1009 * 10007: any curve order modulo 1009 is below 1073 and
        // therefore a product of prime powers under B1 = 2000, so
        // stage 1 always finds the factor on a live curve.
        let n = Uint::from_digit(1009 * 10007);
        let d = Deadline::unlimited();
        let (p, q) = ecm(&n, 2_000, 30, 42, &d, None, Verbosity::Silent).expect("factor");
        assert_eq!(p * q, n);
        assert!(p > Uint::ONE && q > Uint::ONE);
    }

    #[test]
    fn test_ecm_respects_deadline() {
        use std::str::FromStr;
        let p = Uint::from_str("618970019642690137449562111").unwrap();
        let q = Uint::from_str("162259276829213363391578010288127").unwrap();
        let n = p * q;
        let d = Deadline::new(None, Some(10_000));
        assert_eq!(ecm(&n, 50_000, 16, 1, &d, None, Verbosity::Silent), None);
        assert!(d.iters() <= 15_000);
    }
}
