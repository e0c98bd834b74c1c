// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Synchronous factoring queries: parse, bound-check, run the
//! cascade under a derived budget, shape the reply.
//!
//! Every failure is one of the enumerated statuses; invalid input is
//! rejected before any computation and budget exhaustion is an
//! ordinary `timeout` reply, not an error.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cascade::{self, Outcome, Settings, Strategy};
use crate::deadline::Deadline;
use crate::exec_tools::Tools;
use crate::{params, Uint, MAX_BITS};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FactorRequest {
    /// Decimal representation of the integer to factor.
    pub n: String,
    /// Wall budget in milliseconds; derived from the bit length when
    /// absent.
    pub budget_ms: Option<u64>,
    /// Iteration budget; unbounded when absent.
    pub budget_iters: Option<u64>,
    /// Optional strategy tag: "cascade" (default) or "rho".
    pub strategy: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Timeout,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct FactorResponse {
    pub status: Status,
    pub n: String,
    pub p: Option<String>,
    pub q: Option<String>,
    pub method: Option<String>,
    pub steps: Vec<String>,
    pub time_ms: u64,
    pub iters: u64,
    pub is_p_prime: Option<bool>,
    pub is_q_prime: Option<bool>,
    pub error: Option<String>,
}

impl FactorResponse {
    fn error(n: &str, msg: String) -> FactorResponse {
        FactorResponse {
            status: Status::Error,
            n: n.to_string(),
            p: None,
            q: None,
            method: None,
            steps: vec![],
            time_ms: 0,
            iters: 0,
            is_p_prime: None,
            is_q_prime: None,
            error: Some(msg),
        }
    }
}

pub fn factor_sync(
    req: &FactorRequest,
    tools: &Tools,
    tpool: Option<&rayon::ThreadPool>,
) -> FactorResponse {
    let nstr = req.n.trim();
    if nstr.is_empty() || !nstr.bytes().all(|b| b.is_ascii_digit()) {
        return FactorResponse::error(nstr, "provide N as a positive decimal integer".to_string());
    }
    let Ok(n) = Uint::from_str(nstr) else {
        return FactorResponse::error(nstr, "N is out of range".to_string());
    };
    if n < Uint::from_digit(2) {
        return FactorResponse::error(nstr, "N must be at least 2".to_string());
    }
    if n.bits() > MAX_BITS {
        return FactorResponse::error(
            nstr,
            format!("input is {} bits, maximum is {MAX_BITS}", n.bits()),
        );
    }
    let strategy = match req.strategy.as_deref() {
        None | Some("cascade") => Strategy::Cascade,
        Some("rho") => Strategy::RhoOnly,
        Some(other) => {
            return FactorResponse::error(nstr, format!("unknown strategy {other:?}"));
        }
    };

    let budget_ms = req.budget_ms.unwrap_or_else(|| params::default_budget_ms(n.bits()));
    let deadline = Deadline::new(Some(Duration::from_millis(budget_ms)), req.budget_iters);
    let settings = Settings {
        strategy,
        ..Settings::default()
    };
    let outcome = cascade::factor(&n, &deadline, tools, tpool, &settings);
    let time_ms = deadline.elapsed().as_millis() as u64;
    let iters = deadline.iters();
    match outcome {
        Outcome::Prime { trace } => FactorResponse {
            status: Status::Ok,
            n: nstr.to_string(),
            p: Some(nstr.to_string()),
            q: Some("1".to_string()),
            method: Some("prime".to_string()),
            steps: trace,
            time_ms,
            iters,
            is_p_prime: Some(true),
            is_q_prime: Some(false),
            error: None,
        },
        Outcome::Factored(f) => FactorResponse {
            status: Status::Ok,
            n: nstr.to_string(),
            p: Some(f.p.to_string()),
            q: Some(f.q.to_string()),
            method: Some(f.method.to_string()),
            steps: f.trace,
            time_ms,
            iters,
            is_p_prime: Some(f.p_prime),
            is_q_prime: Some(f.q_prime),
            error: None,
        },
        Outcome::Exhausted { trace } => FactorResponse {
            status: Status::Timeout,
            n: nstr.to_string(),
            p: None,
            q: None,
            method: None,
            steps: trace,
            time_ms,
            iters,
            is_p_prime: None,
            is_q_prime: None,
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(n: &str) -> FactorRequest {
        FactorRequest {
            n: n.to_string(),
            ..FactorRequest::default()
        }
    }

    #[test]
    fn test_sync_ok() {
        let tools = Tools::none();
        let r = factor_sync(
            &FactorRequest {
                n: "8633".to_string(),
                budget_ms: Some(5_000),
                ..FactorRequest::default()
            },
            &tools,
            None,
        );
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.p.as_deref(), Some("89"));
        assert_eq!(r.q.as_deref(), Some("97"));
        assert_eq!(r.is_p_prime, Some(true));
        assert!(!r.steps.is_empty());
    }

    #[test]
    fn test_sync_fermat_scenario() {
        // Iteration budget small enough that the trial limit stays
        // under 83: the trace must show the near-square hit.
        let tools = Tools::none();
        let r = factor_sync(
            &FactorRequest {
                n: "8051".to_string(),
                budget_ms: Some(5_000),
                budget_iters: Some(2_000),
                ..FactorRequest::default()
            },
            &tools,
            None,
        );
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.p.as_deref(), Some("83"));
        assert_eq!(r.q.as_deref(), Some("97"));
        assert_eq!(r.method.as_deref(), Some("fermat"));
    }

    #[test]
    fn test_sync_prime() {
        let tools = Tools::none();
        let r = factor_sync(&req("2305843009213693951"), &tools, None);
        assert_eq!(r.status, Status::Ok);
        assert_eq!(r.method.as_deref(), Some("prime"));
        assert_eq!(r.q.as_deref(), Some("1"));
    }

    #[test]
    fn test_sync_timeout() {
        let tools = Tools::none();
        let p = "618970019642690137449562111";
        let q = "162259276829213363391578010288127";
        let n = (Uint::from_str(p).unwrap() * Uint::from_str(q).unwrap()).to_string();
        let r = factor_sync(
            &FactorRequest {
                n,
                budget_ms: Some(150),
                budget_iters: Some(100_000),
                ..FactorRequest::default()
            },
            &tools,
            None,
        );
        assert_eq!(r.status, Status::Timeout);
        assert!(r.p.is_none());
        assert!(r.steps.iter().any(|s| s.contains("budget")));
    }

    #[test]
    fn test_sync_invalid() {
        let tools = Tools::none();
        for bad in ["", "x12", "-5", "1"] {
            let r = factor_sync(&req(bad), &tools, None);
            assert_eq!(r.status, Status::Error, "{bad:?}");
            assert!(r.error.is_some());
        }
        let r = factor_sync(
            &FactorRequest {
                n: "8051".to_string(),
                strategy: Some("qs".to_string()),
                ..FactorRequest::default()
            },
            &tools,
            None,
        );
        assert_eq!(r.status, Status::Error);
        // 10^155 exceeds 512 bits.
        let r = factor_sync(&req(&format!("1{}", "0".repeat(155))), &tools, None);
        assert_eq!(r.status, Status::Error);
    }

    #[test]
    fn test_default_budget_from_bits() {
        // 13-bit input: the fallback budget applies and the request
        // still completes well inside it.
        let tools = Tools::none();
        let r = factor_sync(&req("8633"), &tools, None);
        assert_eq!(r.status, Status::Ok);
        assert!(r.time_ms < 650);
    }
}
