// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Optional external factoring helpers invoked as subprocesses.
//!
//! Two collaborators are understood: the GMP-ECM binary (`ecm`) for
//! deep ECM/P-1/P+1 runs, and a fixed-width rho helper for 64-bit
//! inputs. Both are capabilities behind traits with no-op fallbacks:
//! a missing binary silently skips the corresponding cascade stage,
//! a timed out run counts as a miss for that stage only.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::Uint;

/// How an external stage ended. `Unavailable` is not an error: the
/// cascade continues as if the stage did not exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolResult {
    Factor(Uint),
    Miss,
    Unavailable,
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcmMode {
    Ecm,
    Pm1,
    Pp1,
}

/// Deep ECM (and friends) through an external arbitrary-precision
/// binary with the GMP-ECM argument grammar.
pub trait EcmBackend: Send + Sync {
    fn available(&self) -> bool;
    fn attempt(
        &self,
        n: &Uint,
        mode: EcmMode,
        b1: u64,
        b2: Option<u64>,
        curves: u32,
        timeout: Duration,
    ) -> ToolResult;
}

/// 64-bit rho helper speaking `--n/--iters/--restarts` and replying
/// `factors <p> <q>` or `prime <n>` on stdout.
pub trait Rho64Backend: Send + Sync {
    fn available(&self) -> bool;
    fn attempt(&self, n: u64, iters: u64, restarts: u32, timeout: Duration)
        -> Option<Rho64Reply>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rho64Reply {
    Factors(u64, u64),
    Prime,
}

pub struct GmpEcm {
    bin: Option<PathBuf>,
}

impl GmpEcm {
    pub fn detect() -> Self {
        GmpEcm {
            bin: find_in_path("ecm"),
        }
    }

    pub fn with_path(p: PathBuf) -> Self {
        GmpEcm { bin: Some(p) }
    }

    pub fn none() -> Self {
        GmpEcm { bin: None }
    }
}

impl EcmBackend for GmpEcm {
    fn available(&self) -> bool {
        self.bin.is_some()
    }

    fn attempt(
        &self,
        n: &Uint,
        mode: EcmMode,
        b1: u64,
        b2: Option<u64>,
        curves: u32,
        timeout: Duration,
    ) -> ToolResult {
        let Some(bin) = &self.bin else {
            return ToolResult::Unavailable;
        };
        let mut cmd = Command::new(bin);
        cmd.arg("-q");
        match mode {
            EcmMode::Ecm => {
                cmd.arg("-c").arg(curves.to_string());
            }
            EcmMode::Pm1 => {
                cmd.arg("-pm1");
            }
            EcmMode::Pp1 => {
                cmd.arg("-pp1");
            }
        }
        cmd.arg(b1.to_string());
        if let Some(b2) = b2 {
            cmd.arg(b2.to_string());
        }
        cmd.arg(n.to_string());
        match run_with_timeout(cmd, timeout) {
            Run::Output(text) => match scan_for_divisor(n, &text) {
                Some(d) => ToolResult::Factor(d),
                None => ToolResult::Miss,
            },
            Run::TimedOut => ToolResult::TimedOut,
            Run::Failed => ToolResult::Unavailable,
        }
    }
}

pub struct CprimeRho {
    bin: Option<PathBuf>,
}

impl CprimeRho {
    pub fn detect() -> Self {
        CprimeRho {
            bin: find_in_path("cprime_rho"),
        }
    }

    pub fn none() -> Self {
        CprimeRho { bin: None }
    }
}

impl Rho64Backend for CprimeRho {
    fn available(&self) -> bool {
        self.bin.is_some()
    }

    fn attempt(
        &self,
        n: u64,
        iters: u64,
        restarts: u32,
        timeout: Duration,
    ) -> Option<Rho64Reply> {
        let bin = self.bin.as_ref()?;
        let mut cmd = Command::new(bin);
        cmd.arg("--n")
            .arg(n.to_string())
            .arg("--iters")
            .arg(iters.to_string())
            .arg("--restarts")
            .arg(restarts.to_string());
        let Run::Output(text) = run_with_timeout(cmd, timeout) else {
            return None;
        };
        let mut words = text.split_whitespace();
        match words.next() {
            Some("factors") => {
                let p = words.next().and_then(|w| w.parse::<u64>().ok())?;
                let q = words.next().and_then(|w| w.parse::<u64>().ok())?;
                if p > 1 && q > 1 && p.checked_mul(q) == Some(n) {
                    Some(Rho64Reply::Factors(p, q))
                } else {
                    None
                }
            }
            Some("prime") => Some(Rho64Reply::Prime),
            _ => None,
        }
    }
}

/// The bundle of external capabilities handed to the cascade.
pub struct Tools {
    pub ecm: Box<dyn EcmBackend>,
    pub rho64: Box<dyn Rho64Backend>,
}

impl Tools {
    pub fn detect() -> Self {
        Tools {
            ecm: Box::new(GmpEcm::detect()),
            rho64: Box::new(CprimeRho::detect()),
        }
    }

    /// No external helpers: every external stage degrades to a skip.
    pub fn none() -> Self {
        Tools {
            ecm: Box::new(GmpEcm::none()),
            rho64: Box::new(CprimeRho::none()),
        }
    }
}

enum Run {
    Output(String),
    TimedOut,
    Failed,
}

fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Run {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let Ok(mut child) = cmd.spawn() else {
        return Run::Failed;
    };
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Run::TimedOut;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(_) => {
                let _ = child.kill();
                return Run::Failed;
            }
        }
    }
    use std::io::Read;
    let mut text = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut text);
    }
    text.push('\n');
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut text);
    }
    Run::Output(text)
}

/// Scans combined subprocess output for a decimal token that evenly
/// divides n.
fn scan_for_divisor(n: &Uint, text: &str) -> Option<Uint> {
    for token in text.split(|c: char| !c.is_ascii_digit()) {
        if token.is_empty() || token.len() > 160 {
            continue;
        }
        let Ok(d) = Uint::from_str(token) else {
            continue;
        };
        if d > Uint::ONE && d < *n && *n % d == Uint::ZERO {
            return Some(d);
        }
    }
    None
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_for_divisor() {
        let n = Uint::from_digit(8051); // 83 * 97
        let out = "Using B1=2000, B2=147396, polynomial x^1\n\
                   Factor found in step 1: 83\n";
        assert_eq!(scan_for_divisor(&n, out), Some(Uint::from_digit(83)));
        // Numbers that do not divide n are skipped.
        assert_eq!(scan_for_divisor(&n, "2000 147396 12345"), None);
        // Trivial divisors are not factors.
        assert_eq!(scan_for_divisor(&n, "1 8051"), None);
    }

    #[test]
    fn test_missing_binaries_degrade() {
        let tools = Tools::none();
        assert!(!tools.ecm.available());
        assert!(!tools.rho64.available());
        let r = tools.ecm.attempt(
            &Uint::from_digit(8051),
            EcmMode::Ecm,
            2000,
            None,
            4,
            Duration::from_secs(1),
        );
        assert_eq!(r, ToolResult::Unavailable);
        assert_eq!(tools.rho64.attempt(8051, 1000, 4, Duration::from_secs(1)), None);
    }

    #[test]
    fn test_rho64_reply_parsing() {
        // Exercise the reply grammar through a shell stub.
        let stub = CprimeRho {
            bin: Some(PathBuf::from("/bin/echo")),
        };
        // `echo --n 35 ...` prints the arguments back; no reply
        // keyword, so the attempt is a miss.
        assert_eq!(stub.attempt(35, 10, 1, Duration::from_secs(2)), None);
    }
}
