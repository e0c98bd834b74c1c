// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Fermat near-square search.
//!
//! Writes n = a^2 - b^2 = (a-b)(a+b) for a sliding a starting at
//! ceil(sqrt(n)). Only effective when the two factors are close; the
//! bounded increment count keeps the stage cheap when they are not.

use crate::arith;
use crate::deadline::Deadline;
use crate::Uint;

pub fn fermat(n: &Uint, steps: u64, deadline: &Deadline) -> Option<(Uint, Uint)> {
    let one = Uint::ONE;
    let mut a = arith::isqrt(*n);
    if a * a < *n {
        a += one;
    }
    for i in 0..steps {
        if i % 32 == 0 && deadline.tick(32).is_err() {
            return None;
        }
        let b2 = a * a - *n;
        if arith::is_square(&b2) {
            let b = arith::isqrt(b2);
            let (p, q) = (a - b, a + b);
            if p > one && q < *n {
                return Some((p, q));
            }
        }
        a += one;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fermat_close_factors() {
        // 8051 = 83 * 97, caught at a = 90 since 90^2 - 8051 = 7^2.
        let d = Deadline::unlimited();
        let (p, q) = fermat(&Uint::from_digit(8051), 256, &d).unwrap();
        assert_eq!(p, Uint::from_digit(83));
        assert_eq!(q, Uint::from_digit(97));

        // 899 = 29 * 31 on the very first step (a = 30).
        let (p, q) = fermat(&Uint::from_digit(899), 256, &d).unwrap();
        assert_eq!((p, q), (Uint::from_digit(29), Uint::from_digit(31)));

        // Perfect squares split immediately.
        let (p, q) = fermat(&Uint::from_digit(1018081), 1, &d).unwrap();
        assert_eq!((p, q), (Uint::from_digit(1009), Uint::from_digit(1009)));
    }

    #[test]
    fn test_fermat_distant_factors() {
        // 3 * 100003: no near-square structure within 256 steps.
        let d = Deadline::unlimited();
        assert!(fermat(&Uint::from_digit(300009), 256, &d).is_none());
    }
}
