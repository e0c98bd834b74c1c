// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! A shared budget token threaded through every factoring stage.
//!
//! A [`Deadline`] carries an optional monotonic time bound, an
//! optional iteration cap, a shared iteration counter, a cooperative
//! cancellation flag and an optional progress observer. Inner loops
//! call [`Deadline::tick`] once per batch of iterations (never per
//! iteration); stage boundaries call [`Deadline::check`].
//!
//! Cofactor recursion uses [`Deadline::split`] to hand a fraction of
//! the remaining budget to the child while sharing the counter and
//! the cancellation flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::params::MULTS_PER_MS;

/// Why a stage had to stop early.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    Expired,
    Canceled,
}

type Observer = dyn Fn(u64) + Send + Sync;

#[derive(Clone)]
pub struct Deadline {
    start: Instant,
    at: Option<Instant>,
    // Absolute bound on the shared counter.
    iter_cap: Option<u64>,
    iters: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    observer: Option<Arc<Observer>>,
    observe_every: u64,
    next_observe: Arc<AtomicU64>,
}

impl Deadline {
    pub fn new(time: Option<Duration>, iter_cap: Option<u64>) -> Self {
        let start = Instant::now();
        Deadline {
            start,
            at: time.map(|t| start + t),
            iter_cap,
            iters: Arc::new(AtomicU64::new(0)),
            cancel: Arc::new(AtomicBool::new(false)),
            observer: None,
            observe_every: u64::MAX,
            next_observe: Arc::new(AtomicU64::new(u64::MAX)),
        }
    }

    pub fn after_ms(ms: u64) -> Self {
        Self::new(Some(Duration::from_millis(ms)), None)
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Installs a progress observer called with the running iteration
    /// count roughly every `every` iterations (a checkpoint).
    pub fn with_observer(mut self, every: u64, f: Arc<Observer>) -> Self {
        self.observer = Some(f);
        self.observe_every = every;
        self.next_observe = Arc::new(AtomicU64::new(every));
        self
    }

    /// Records a batch of iterations, fires the checkpoint observer
    /// when due, and reports whether work may continue.
    pub fn tick(&self, batch: u64) -> Result<(), Interrupt> {
        let total = self.iters.fetch_add(batch, Ordering::Relaxed) + batch;
        if let Some(obs) = &self.observer {
            if total >= self.next_observe.load(Ordering::Relaxed) {
                self.next_observe
                    .store(total + self.observe_every, Ordering::Relaxed);
                obs(total);
            }
        }
        self.interrupted(total)
    }

    pub fn check(&self) -> Result<(), Interrupt> {
        self.interrupted(self.iters.load(Ordering::Relaxed))
    }

    pub fn expired(&self) -> bool {
        self.check().is_err()
    }

    fn interrupted(&self, total: u64) -> Result<(), Interrupt> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Interrupt::Canceled);
        }
        if let Some(cap) = self.iter_cap {
            if total >= cap {
                return Err(Interrupt::Expired);
            }
        }
        if let Some(at) = self.at {
            if Instant::now() >= at {
                return Err(Interrupt::Expired);
            }
        }
        Ok(())
    }

    pub fn iters(&self) -> u64 {
        self.iters.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Remaining wall budget in milliseconds (None when unbounded).
    pub fn remaining_ms(&self) -> Option<u64> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64)
    }

    /// Remaining iteration budget (None when unbounded).
    pub fn remaining_iters(&self) -> Option<u64> {
        self.iter_cap.map(|cap| cap.saturating_sub(self.iters()))
    }

    /// Whether the remaining budget plausibly covers a stage whose
    /// declared cost is `cost` modular multiplications.
    pub fn allows(&self, cost: u64) -> bool {
        if self.check().is_err() {
            return false;
        }
        if let Some(left) = self.remaining_iters() {
            if left < cost {
                return false;
            }
        }
        if let Some(ms) = self.remaining_ms() {
            if ms.saturating_mul(MULTS_PER_MS) < cost {
                return false;
            }
        }
        true
    }

    /// A child deadline owning num/den of the remaining budget.
    /// The counter, cancellation flag and observer are shared.
    pub fn split(&self, num: u64, den: u64) -> Deadline {
        let now = Instant::now();
        let at = self.at.map(|at| {
            let left = at.saturating_duration_since(now);
            now + left.mul_f64(num as f64 / den as f64)
        });
        let iter_cap = self
            .iter_cap
            .map(|cap| self.iters() + cap.saturating_sub(self.iters()) * num / den);
        Deadline {
            start: now,
            at,
            iter_cap,
            iters: self.iters.clone(),
            cancel: self.cancel.clone(),
            observer: self.observer.clone(),
            observe_every: self.observe_every,
            next_observe: self.next_observe.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iter_cap() {
        let d = Deadline::new(None, Some(1000));
        assert!(d.tick(256).is_ok());
        assert!(d.tick(256).is_ok());
        assert!(d.tick(256).is_ok());
        // 1024 >= 1000
        assert_eq!(d.tick(256), Err(Interrupt::Expired));
        assert_eq!(d.remaining_iters(), Some(0));
    }

    #[test]
    fn test_cancel_wins() {
        let d = Deadline::new(None, Some(1_000_000));
        assert!(d.check().is_ok());
        d.request_cancel();
        assert_eq!(d.tick(1), Err(Interrupt::Canceled));
        assert_eq!(d.check(), Err(Interrupt::Canceled));
    }

    #[test]
    fn test_split_shares_counter() {
        let d = Deadline::new(None, Some(10_000));
        d.tick(2_000).unwrap();
        let child = d.split(1, 2);
        // Child owns half of the remaining 8000 iterations.
        assert_eq!(child.remaining_iters(), Some(4_000));
        child.tick(4_000).ok();
        assert!(child.check().is_err());
        // Parent saw the child's consumption.
        assert_eq!(d.iters(), 6_000);
        assert!(d.check().is_ok());
    }

    #[test]
    fn test_observer_fires_at_checkpoints() {
        use std::sync::atomic::AtomicUsize;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let d = Deadline::new(None, None).with_observer(
            1000,
            Arc::new(move |_| {
                c.fetch_add(1, Ordering::Relaxed);
            }),
        );
        for _ in 0..10 {
            d.tick(256).unwrap();
        }
        // 2560 iterations crossed the 1000 and 2000 marks.
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_allows() {
        let d = Deadline::new(None, Some(10_000));
        assert!(d.allows(5_000));
        assert!(!d.allows(20_000));
        let d = Deadline::after_ms(10_000);
        assert!(d.allows(1_000));
    }
}
