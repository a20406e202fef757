//! Bounded, growable pool of connection worker threads.
//!
//! Workers are spawned on demand up to a maximum and retire after sitting
//! idle. When every worker is busy and the maximum is reached, `execute`
//! blocks the submitting thread until a worker frees up, so a flood of
//! connections throttles the accept loop instead of spawning without bound.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use super::{LISTENER_TARGET, PoolError};

const IDLE_RETIREMENT: Duration = Duration::from_secs(30);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle to a shared worker pool.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    work_ready: Condvar,
    capacity: Condvar,
    max_workers: usize,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    workers: usize,
    idle: usize,
    spawned: u64,
    shutdown: bool,
}

impl PoolState {
    fn has_free_worker(&self) -> bool {
        self.idle > self.queue.len()
    }
}

impl WorkerPool {
    pub(crate) fn new(max_workers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                work_ready: Condvar::new(),
                capacity: Condvar::new(),
                max_workers: max_workers.max(1),
            }),
        }
    }

    /// Runs `job` on a worker, waiting for capacity when saturated.
    pub(crate) fn execute<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        loop {
            if state.shutdown {
                return Err(PoolError::ShutDown);
            }
            if state.has_free_worker() {
                state.queue.push_back(Box::new(job));
                self.inner.work_ready.notify_one();
                return Ok(());
            }
            if state.workers < self.inner.max_workers {
                state.spawned += 1;
                let name = format!("stafd-worker-{}", state.spawned);
                let inner = Arc::clone(&self.inner);
                thread::Builder::new()
                    .name(name)
                    .spawn(move || worker_loop(&inner))
                    .map_err(|source| PoolError::Spawn { source })?;
                state.workers += 1;
                state.queue.push_back(Box::new(job));
                return Ok(());
            }
            self.inner.capacity.wait(&mut state);
        }
    }

    /// Rejects further work and lets idle workers exit.
    pub(crate) fn shutdown(&self) {
        self.inner.state.lock().shutdown = true;
        self.inner.work_ready.notify_all();
        self.inner.capacity.notify_all();
    }

    pub(crate) fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Number of live worker threads.
    pub(crate) fn workers(&self) -> usize {
        self.inner.state.lock().workers
    }
}

fn worker_loop(inner: &PoolInner) {
    let mut state = inner.state.lock();
    loop {
        if let Some(job) = state.queue.pop_front() {
            drop(state);
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(target: LISTENER_TARGET, "connection worker panicked");
            }
            state = inner.state.lock();
            continue;
        }
        if state.shutdown {
            break;
        }
        state.idle += 1;
        inner.capacity.notify_one();
        let timed_out = inner
            .work_ready
            .wait_for(&mut state, IDLE_RETIREMENT)
            .timed_out();
        state.idle -= 1;
        if timed_out && state.queue.is_empty() {
            break;
        }
    }
    state.workers -= 1;
    debug!(
        target: LISTENER_TARGET,
        workers = state.workers,
        "connection worker retired"
    );
    inner.capacity.notify_one();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new(4);
        let (sender, receiver) = mpsc::channel();
        for index in 0..8 {
            let sender = sender.clone();
            pool.execute(move || {
                sender.send(index).expect("send");
            })
            .expect("execute");
        }
        let mut seen: Vec<i32> = (0..8)
            .map(|_| receiver.recv_timeout(Duration::from_secs(5)).expect("job ran"))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        assert!(pool.workers() <= pool.max_workers());
    }

    #[rstest]
    fn never_exceeds_the_maximum() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = mpsc::channel();
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let sender = sender.clone();
            pool.execute(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                sender.send(()).expect("send");
            })
            .expect("execute");
        }
        for _ in 0..6 {
            receiver
                .recv_timeout(Duration::from_secs(5))
                .expect("job finished");
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[rstest]
    fn survives_panicking_jobs() {
        let pool = WorkerPool::new(1);
        pool.execute(|| panic!("boom")).expect("execute");
        let (sender, receiver) = mpsc::channel();
        pool.execute(move || sender.send(()).expect("send"))
            .expect("execute");
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("pool keeps working");
    }

    #[rstest]
    fn rejects_work_after_shutdown() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(matches!(pool.execute(|| {}), Err(PoolError::ShutDown)));
    }
}
