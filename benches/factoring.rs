// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::str::FromStr;
use std::time::Instant;

use rhocrack::deadline::Deadline;
use rhocrack::{pollard_pm1, pollard_rho, Uint, Verbosity};

fn main() {
    let d = Deadline::unlimited();

    // 48-bit semiprimes through the rho64 fast path.
    let ns: &[u64] = &[
        235075827453629,
        166130059616737,
        159247921097933,
        224077614412439,
        219669028971857,
    ];
    let start = Instant::now();
    let mut ok = 0;
    for _ in 0..20 {
        for &n in ns {
            if pollard_rho::rho64(n, 2, 1, 60_000, &d).is_some() {
                ok += 1;
            }
        }
    }
    let t = start.elapsed().as_secs_f64();
    eprintln!(
        "rho64: {ok}/{} semiprimes in {:.3}s ({:.2}ms each)",
        20 * ns.len(),
        t,
        t * 1000.0 / (20.0 * ns.len() as f64)
    );

    // Multiprecision rho on a 40-bit semiprime.
    let n = Uint::from_str("1000036000099").unwrap();
    let start = Instant::now();
    for _ in 0..5 {
        assert!(pollard_rho::rho(&n, 2, 1, 500_000, &d, None).is_some());
    }
    let t = start.elapsed().as_secs_f64();
    eprintln!("rho mp: 5 runs in {:.3}s", t);

    // P-1 with a 128-bit smooth factor next to a 256-bit strong prime.
    let p128 = Uint::from_str("41815371135748981224332082131").unwrap();
    let p256 = Uint::from_str(
        "92504863121296400653652753711376140294298584431452956354291724864471735145079",
    )
    .unwrap();
    let n = p128 * p256;
    let start = Instant::now();
    let res = pollard_pm1::pm1(&n, 30_000, 450_000, &d, Verbosity::Silent);
    let t = start.elapsed().as_secs_f64();
    eprintln!("pm1 (B1=30000 B2=450000): found={} in {:.3}s", res.is_some(), t);
}
