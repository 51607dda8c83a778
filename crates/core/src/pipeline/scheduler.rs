//! Cooperative task scheduler (spec §5): a fixed pool of worker threads that
//! run resumable [`Task`]s to completion without ever blocking a worker on
//! network I/O.
//!
//! Grounded on the teacher's `transport::tcp::accept_loop` thread-per-
//! connection model, replaced per spec §5/§9 DESIGN NOTES: connections are
//! tasks resumed by a bounded worker pool rather than owning a dedicated OS
//! thread each. Readiness notification is approximated with non-blocking
//! sockets plus bounded retry (`RescheduleAfter`) since the dependency stack
//! carries no `mio`/`epoll` binding (spec §5 substitution, recorded in
//! DESIGN.md).

use std::collections::{BinaryHeap, VecDeque};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Default readiness-poll interval used when a task reports `WouldBlock`
/// (spec §5 substitution note).
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What a [`Task::step`] call reports back to the scheduler.
pub enum StepOutcome {
    /// The task has nothing left to do; drop it.
    Done,
    /// Run again as soon as a worker is free.
    Reschedule,
    /// Run again no earlier than `at`.
    RescheduleAfter(Duration),
}

/// A unit of cooperatively-scheduled work (spec §5 GLOSSARY "Task"). Each
/// `step` call must return promptly — no blocking syscalls.
pub trait Task: Send {
    fn step(&mut self) -> StepOutcome;
}

struct Delayed {
    at: Instant,
    task: Box<dyn Task>,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}
impl Eq for Delayed {}
impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse so `BinaryHeap` (a max-heap) pops the earliest deadline first.
        other.at.cmp(&self.at)
    }
}

struct Shared {
    ready: Mutex<VecDeque<Box<dyn Task>>>,
    delayed: Mutex<BinaryHeap<Delayed>>,
    not_empty: Condvar,
    running: AtomicBool,
    queued: AtomicUsize,
}

/// Fixed-size worker-thread pool running [`Task`]s to completion (spec §5
/// "Scheduling model"). Delayed tasks (waiting out a `RescheduleAfter`) live
/// in a separate min-heap polled by a dedicated timer thread so worker
/// threads never sleep.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
    timer: Option<thread::JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn `worker_threads` workers plus one timer thread for delayed
    /// rescheduling (spec §5: "default 8" workers).
    pub fn start(worker_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            ready: Mutex::new(VecDeque::new()),
            delayed: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            running: AtomicBool::new(true),
            queued: AtomicUsize::new(0),
        });

        let workers = (0..worker_threads.max(1))
            .map(|id| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("reflector-worker-{id}"))
                    .spawn(move || worker_loop(shared))
                    .expect("spawn worker thread")
            })
            .collect();

        let timer = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("reflector-scheduler-timer".to_string())
                .spawn(move || timer_loop(shared))
                .expect("spawn timer thread")
        };

        Scheduler { shared, workers, timer: Some(timer) }
    }

    /// Enqueue a task to run as soon as a worker is free.
    pub fn spawn(&self, task: Box<dyn Task>) {
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        self.shared.ready.lock().push_back(task);
        self.shared.not_empty.notify_one();
    }

    pub fn queued_len(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Stop accepting new work and join every worker/timer thread.
    pub fn shutdown(mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let mut task = {
            let mut ready = shared.ready.lock();
            loop {
                if let Some(task) = ready.pop_front() {
                    break task;
                }
                if !shared.running.load(Ordering::SeqCst) {
                    return;
                }
                shared.not_empty.wait_for(&mut ready, Duration::from_millis(200));
                if !shared.running.load(Ordering::SeqCst) {
                    return;
                }
            }
        };

        match task.step() {
            StepOutcome::Done => {
                shared.queued.fetch_sub(1, Ordering::SeqCst);
            }
            StepOutcome::Reschedule => {
                shared.ready.lock().push_back(task);
                shared.not_empty.notify_one();
            }
            StepOutcome::RescheduleAfter(delay) => {
                shared.delayed.lock().push(Delayed { at: Instant::now() + delay, task });
            }
        }
    }
}

fn timer_loop(shared: Arc<Shared>) {
    while shared.running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let mut due = Vec::new();
        {
            let mut delayed = shared.delayed.lock();
            while let Some(top) = delayed.peek() {
                if top.at > now {
                    break;
                }
                due.push(delayed.pop().unwrap().task);
            }
        }
        if !due.is_empty() {
            let mut ready = shared.ready.lock();
            for task in due {
                ready.push_back(task);
            }
            shared.not_empty.notify_all();
        }
        thread::sleep(Duration::from_millis(5));
    }
}
