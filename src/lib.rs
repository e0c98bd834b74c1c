// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Rhocrack factors composite integers by racing a cascade of
//! number-theoretic methods under a shared time/iteration budget:
//! BPSW primality, trial division, Fermat near-square search,
//! Pollard P-1, Williams P+1, SQUFOF, Pollard rho (Brent variant)
//! and ECM stage 1, with optional external helper binaries.
//!
//! The cascade is exposed synchronously ([`service`]) and as
//! long-running jobs with admission control and cooperative
//! cancellation ([`jobs`]).

pub mod arith;
pub mod arith_montgomery;
pub mod deadline;
pub mod fbase;
pub mod params;
pub mod primality;

// Factoring stages
pub mod ecm;
pub mod fermat;
pub mod pollard_pm1;
pub mod pollard_rho;
pub mod pp1;
pub mod squfof;

// Orchestration and service surface
pub mod cascade;
pub mod exec_tools;
pub mod jobs;
pub mod service;

// Inputs are capped at 512 bits; modular multiplication needs
// twice that width.
pub type Uint = bnum::BUint<16>;

/// Hard ceiling on accepted input size, in bits.
pub const MAX_BITS: u32 = 512;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    #[default]
    Silent,
    Info,
    Verbose,
    Debug,
}
