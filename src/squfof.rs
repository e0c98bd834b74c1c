// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Shanks's square forms factorization for word-sized inputs.
//!
//! A cheap O(n^1/4) method that complements rho for 64-bit
//! cofactors. Runs the principal cycle of binary quadratic forms of
//! discriminant 4kn until a square form appears, then walks the
//! reverse cycle to the ambiguous form.
//!
//! Reference: http://homes.cerias.purdue.edu/~ssw/squfof.pdf

use num_integer::Integer;

use crate::arith::{isqrt64, maybe_square};
use crate::deadline::Deadline;

pub fn squfof(n: u64, deadline: &Deadline) -> Option<(u64, u64)> {
    if n % 2 == 0 {
        return Some((2, n / 2));
    }
    // Loop over multipliers
    for k in 1_u64..=50 {
        // The form arithmetic needs kn to stay well inside u64.
        let Some(kn) = n.checked_mul(k) else {
            continue;
        };
        if kn >= 1 << 62 {
            continue;
        }
        if deadline.check().is_err() {
            return None;
        }
        if let Some(d) = squfof_mult(n, kn, deadline) {
            return Some((d, n / d));
        }
    }
    None
}

fn squfof_mult(n: u64, kn: u64, deadline: &Deadline) -> Option<u64> {
    let nsqrt = isqrt64(kn);
    if nsqrt * nsqrt == kn {
        let d = Integer::gcd(&n, &nsqrt);
        if d > 1 && d < n {
            return Some(d);
        }
        return None;
    }
    let iters = 3 * isqrt64(nsqrt) + 16;

    // Forward cycle until some Q at an even index is a perfect square.
    let mut p_prev = nsqrt;
    let mut q_prev = 1_u64;
    let mut q = kn - nsqrt * nsqrt;
    let mut q_sqrt = 0;
    let mut found = false;
    for i in 1..=iters {
        if i % 128 == 0 && deadline.tick(128).is_err() {
            return None;
        }
        let b = (nsqrt + p_prev) / q;
        let p = b * q - p_prev;
        let qnext = if p_prev > p {
            q_prev + b * (p_prev - p)
        } else {
            q_prev - b * (p - p_prev)
        };
        if i % 2 == 1 && maybe_square(qnext) {
            let r = isqrt64(qnext);
            if r * r == qnext {
                q_sqrt = r;
                p_prev = p;
                found = true;
                break;
            }
        }
        p_prev = p;
        q_prev = q;
        q = qnext;
    }
    if !found {
        return None;
    }

    // Reverse cycle from the square form to an ambiguous form.
    let b = (nsqrt - p_prev) / q_sqrt;
    let mut p_prev = b * q_sqrt + p_prev;
    let mut q_prev = q_sqrt;
    let mut q = (kn - p_prev * p_prev) / q_prev;
    for i in 1..=iters {
        if i % 128 == 0 && deadline.tick(128).is_err() {
            return None;
        }
        let b = (nsqrt + p_prev) / q;
        let p = b * q - p_prev;
        if p == p_prev {
            break;
        }
        let qnext = if p_prev > p {
            q_prev + b * (p_prev - p)
        } else {
            q_prev - b * (p - p_prev)
        };
        p_prev = p;
        q_prev = q;
        q = qnext;
    }
    let d = Integer::gcd(&n, &p_prev);
    if d > 1 && d < n {
        Some(d)
    } else {
        None
    }
}
