// Copyright 2024 the rhocrack authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Asynchronous factoring jobs: a bounded queue, worker threads, per
//! client admission control, checkpointed progress and cooperative
//! cancellation.
//!
//! Lifecycle: queued -> started -> {finished, failed, canceled}.
//! Terminal records are frozen, so repeated status queries return
//! identical snapshots. Cancellation flips a shared flag that the
//! cascade polls at batch boundaries: the job stops at the next
//! checkpoint, keeping its partial progress, rather than being
//! preempted.
//!
//! The store is the only cross-job shared state; transitions check
//! the current state under the lock before writing.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::Serialize;

use crate::cascade::{self, Outcome, Settings};
use crate::deadline::Deadline;
use crate::exec_tools::Tools;
use crate::{Uint, MAX_BITS};

/// Absolute ceiling on the requested iteration budget.
pub const MAX_BUDGET: u64 = 50_000_000;
pub const DEFAULT_BUDGET: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Canceled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Clone, Debug)]
pub struct JobLimits {
    pub max_bits: u32,
    pub max_budget: u64,
    pub workers: usize,
    /// Progress is persisted and cancellation observed at least this
    /// often, counted in iterations.
    pub checkpoint_iters: u64,
}

impl Default for JobLimits {
    fn default() -> Self {
        JobLimits {
            max_bits: MAX_BITS,
            max_budget: MAX_BUDGET,
            workers: 2,
            checkpoint_iters: 4_096,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubmitRequest {
    pub n: String,
    pub budget: Option<u64>,
    /// Client identity (e.g. the requester address) used for the
    /// one-active-job-per-client rule.
    pub client: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubmitReply {
    pub job_id: String,
    pub state: JobState,
    pub bits: u32,
    pub queue_position: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitError {
    InvalidInput(String),
    BitsExceeded(u32),
    BudgetExceeded(u64),
    AdmissionRejected,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            SubmitError::BitsExceeded(bits) => {
                write!(f, "input is {bits} bits, maximum is {MAX_BITS}")
            }
            SubmitError::BudgetExceeded(b) => {
                write!(f, "budget {b} exceeds the cap of {MAX_BUDGET}")
            }
            SubmitError::AdmissionRejected => {
                write!(f, "one active job per client; wait or cancel the running job")
            }
        }
    }
}

impl std::error::Error for SubmitError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobNotFound;

impl std::fmt::Display for JobNotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown job")
    }
}

impl std::error::Error for JobNotFound {}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobResult {
    pub status: String,
    pub p: Option<String>,
    pub q: Option<String>,
    pub method: Option<String>,
    pub trace: Vec<String>,
}

/// The full job record as returned by status queries.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub client: String,
    pub bits: u32,
    pub budget: u64,
    pub iters: u64,
    pub age_sec: f64,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CancelAck {
    pub job_id: String,
    pub state: JobState,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueInfo {
    pub size: usize,
    pub head: Vec<QueueEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueEntry {
    pub job_id: String,
    pub age_sec: f64,
}

struct JobRecord {
    id: String,
    n: Uint,
    client: String,
    bits: u32,
    budget: u64,
    state: JobState,
    iters: u64,
    enqueued: Instant,
    ended: Option<Instant>,
    cancel: Arc<AtomicBool>,
    result: Option<JobResult>,
    error: Option<String>,
}

struct Shared {
    jobs: Mutex<HashMap<String, JobRecord>>,
    queue: Mutex<VecDeque<String>>,
    ready: Condvar,
    shutdown: AtomicBool,
    tools: Tools,
    limits: JobLimits,
    settings: Settings,
}

pub struct JobManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobManager {
    pub fn new(limits: JobLimits) -> Self {
        Self::with_tools(limits, Tools::detect())
    }

    pub fn with_tools(limits: JobLimits, tools: Tools) -> Self {
        let shared = Arc::new(Shared {
            jobs: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            tools,
            limits: limits.clone(),
            settings: Settings::default(),
        });
        let mut workers = Vec::with_capacity(limits.workers);
        for i in 0..limits.workers.max(1) {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("rhocrack-worker-{i}"))
                .spawn(move || worker_loop(shared))
                .expect("cannot spawn worker thread");
            workers.push(handle);
        }
        JobManager { shared, workers }
    }

    /// Validates bounds, applies admission control, enqueues.
    pub fn submit(&self, req: &SubmitRequest) -> Result<SubmitReply, SubmitError> {
        let nstr = req.n.trim();
        if nstr.is_empty() || !nstr.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SubmitError::InvalidInput(
                "N must be a positive decimal integer".to_string(),
            ));
        }
        let n = Uint::from_str(nstr)
            .map_err(|_| SubmitError::InvalidInput("N is out of range".to_string()))?;
        if n < Uint::from_digit(2) {
            return Err(SubmitError::InvalidInput("N must be at least 2".to_string()));
        }
        let bits = n.bits();
        if bits > self.shared.limits.max_bits {
            return Err(SubmitError::BitsExceeded(bits));
        }
        let budget = req.budget.unwrap_or(DEFAULT_BUDGET);
        if budget > self.shared.limits.max_budget {
            return Err(SubmitError::BudgetExceeded(budget));
        }
        let id = new_job_id();
        {
            let mut jobs = self.shared.jobs.lock().unwrap();
            // One active (queued or started) job per client.
            if jobs
                .values()
                .any(|j| j.client == req.client && j.state.is_active())
            {
                return Err(SubmitError::AdmissionRejected);
            }
            jobs.insert(
                id.clone(),
                JobRecord {
                    id: id.clone(),
                    n,
                    client: req.client.clone(),
                    bits,
                    budget,
                    state: JobState::Queued,
                    iters: 0,
                    enqueued: Instant::now(),
                    ended: None,
                    cancel: Arc::new(AtomicBool::new(false)),
                    result: None,
                    error: None,
                },
            );
        }
        let queue_position = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.push_back(id.clone());
            queue.len()
        };
        self.shared.ready.notify_one();
        Ok(SubmitReply {
            job_id: id,
            state: JobState::Queued,
            bits,
            queue_position,
        })
    }

    pub fn status(&self, id: &str) -> Result<JobStatus, JobNotFound> {
        let jobs = self.shared.jobs.lock().unwrap();
        jobs.get(id).map(snapshot).ok_or(JobNotFound)
    }

    /// Requests cancellation. Acknowledges receipt; a started job
    /// stops at its next checkpoint, not immediately. Idempotent.
    pub fn cancel(&self, id: &str) -> Result<CancelAck, JobNotFound> {
        let mut jobs = self.shared.jobs.lock().unwrap();
        let rec = jobs.get_mut(id).ok_or(JobNotFound)?;
        rec.cancel.store(true, Ordering::Relaxed);
        if rec.state == JobState::Queued {
            rec.state = JobState::Canceled;
            rec.ended = Some(Instant::now());
        }
        Ok(CancelAck {
            job_id: rec.id.clone(),
            state: rec.state,
        })
    }

    pub fn queue_info(&self) -> QueueInfo {
        let (ids, size) = {
            let queue = self.shared.queue.lock().unwrap();
            (queue.iter().take(10).cloned().collect::<Vec<_>>(), queue.len())
        };
        let jobs = self.shared.jobs.lock().unwrap();
        let head = ids
            .into_iter()
            .filter_map(|id| {
                jobs.get(&id).map(|j| QueueEntry {
                    job_id: id,
                    age_sec: j.enqueued.elapsed().as_secs_f64(),
                })
            })
            .collect();
        QueueInfo { size, head }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
        // Interrupt whatever is still running so workers can exit.
        {
            let jobs = self.shared.jobs.lock().unwrap();
            for rec in jobs.values() {
                rec.cancel.store(true, Ordering::Relaxed);
            }
        }
        self.shared.ready.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let id = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if shared.shutdown.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(id) = queue.pop_front() {
                    break id;
                }
                let (guard, _) = shared
                    .ready
                    .wait_timeout(queue, Duration::from_millis(100))
                    .unwrap();
                queue = guard;
            }
        };
        run_job(&shared, &id);
    }
}

fn run_job(shared: &Arc<Shared>, id: &str) {
    let (n, budget, cancel) = {
        let mut jobs = shared.jobs.lock().unwrap();
        let Some(rec) = jobs.get_mut(id) else { return };
        if rec.state != JobState::Queued {
            return;
        }
        if rec.cancel.load(Ordering::Relaxed) {
            rec.state = JobState::Canceled;
            rec.ended = Some(Instant::now());
            return;
        }
        rec.state = JobState::Started;
        (rec.n, rec.budget, rec.cancel.clone())
    };
    // The observer persists progress metadata at every checkpoint.
    let observer = {
        let shared = shared.clone();
        let id = id.to_string();
        Arc::new(move |iters: u64| {
            if let Some(rec) = shared.jobs.lock().unwrap().get_mut(&id) {
                rec.iters = iters;
            }
        })
    };
    let deadline = Deadline::new(None, Some(budget))
        .with_cancel(cancel.clone())
        .with_observer(shared.limits.checkpoint_iters, observer);
    let mut settings = shared.settings.clone();
    settings.seed = rand::thread_rng().gen();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        cascade::factor(&n, &deadline, &shared.tools, None, &settings)
    }));

    let mut jobs = shared.jobs.lock().unwrap();
    let Some(rec) = jobs.get_mut(id) else { return };
    rec.iters = deadline.iters();
    rec.ended = Some(Instant::now());
    match outcome {
        Ok(out) => {
            let factored = matches!(out, Outcome::Prime { .. } | Outcome::Factored(_));
            if cancel.load(Ordering::Relaxed) && !factored {
                rec.state = JobState::Canceled;
            } else {
                rec.state = JobState::Finished;
                rec.result = Some(job_result(&rec.n, &out));
            }
        }
        Err(e) => {
            rec.state = JobState::Failed;
            rec.error = Some(panic_message(e));
        }
    }
}

fn job_result(n: &Uint, out: &Outcome) -> JobResult {
    match out {
        Outcome::Prime { trace } => JobResult {
            status: "prime".to_string(),
            p: Some(n.to_string()),
            q: Some("1".to_string()),
            method: Some("prime".to_string()),
            trace: trace.clone(),
        },
        Outcome::Factored(f) => JobResult {
            status: "factored".to_string(),
            p: Some(f.p.to_string()),
            q: Some(f.q.to_string()),
            method: Some(f.method.to_string()),
            trace: f.trace.clone(),
        },
        Outcome::Exhausted { trace } => JobResult {
            status: "exhausted".to_string(),
            p: None,
            q: None,
            method: None,
            trace: trace.clone(),
        },
    }
}

fn snapshot(rec: &JobRecord) -> JobStatus {
    // Terminal ages are frozen so that repeated queries are
    // byte-identical.
    let age = match rec.ended {
        Some(end) => end.duration_since(rec.enqueued),
        None => rec.enqueued.elapsed(),
    };
    JobStatus {
        job_id: rec.id.clone(),
        state: rec.state,
        client: rec.client.clone(),
        bits: rec.bits,
        budget: rec.budget,
        iters: rec.iters,
        age_sec: age.as_secs_f64(),
        result: rec.result.clone(),
        error: rec.error.as_ref().map(|e| truncate(e, 1024)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn panic_message(e: Box<dyn std::any::Any + Send>) -> String {
    let msg = if let Some(s) = e.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    };
    truncate(&msg, 1024)
}

fn new_job_id() -> String {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}
