//! Fixed-size worker pool with one FIFO queue per worker.
//!
//! Every worker owns a state value `S` built once at pool construction; tasks
//! receive it as `&mut S` together with a [`PoolHandle`] for scheduling
//! follow-up work. A panicking task is caught and logged with its worker id,
//! the worker keeps serving its queue, and the panic is returned from the
//! next [`ThreadPool::wait_for_all`].

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("thread pool needs at least one worker")]
    EmptyPool,
    #[error("task on worker {worker} panicked: {message}")]
    TaskPanicked { worker: usize, message: String },
    #[error("wait_for_all called from inside a task of the same pool")]
    WaitFromWorker,
    #[error("thread pool is shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

pub type Task<S> = Box<dyn FnOnce(&mut S, &PoolHandle<S>) + Send + 'static>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Id of the pool the current thread works for, 0 outside any pool.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct QueueState<S> {
    tasks: VecDeque<Task<S>>,
    closed: bool,
}

struct WorkerQueue<S> {
    state: Mutex<QueueState<S>>,
    ready: Condvar,
}

impl<S> WorkerQueue<S> {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }
}

struct Shared<S> {
    id: usize,
    queues: Vec<WorkerQueue<S>>,
    next: AtomicUsize,
    active: Mutex<usize>,
    all_done: Condvar,
    panic: Mutex<Option<PoolError>>,
}

impl<S> Shared<S> {
    fn schedule(&self, task: Task<S>) -> Result<(), PoolError> {
        // Counted before it becomes visible to any worker.
        *lock(&self.active) += 1;

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        let queue = &self.queues[idx];
        let mut st = lock(&queue.state);
        if st.closed {
            drop(st);
            self.finish_one();
            return Err(PoolError::ShutDown);
        }
        st.tasks.push_back(task);
        drop(st);
        queue.ready.notify_one();
        Ok(())
    }

    fn finish_one(&self) {
        let mut active = lock(&self.active);
        *active -= 1;
        if *active == 0 {
            self.all_done.notify_all();
        }
    }

    fn wait_for_all(&self) -> Result<(), PoolError> {
        if CURRENT_POOL.with(|c| c.get()) == self.id {
            return Err(PoolError::WaitFromWorker);
        }
        let mut active = lock(&self.active);
        while *active > 0 {
            active = self
                .all_done
                .wait(active)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(active);
        match lock(&self.panic).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Cloneable scheduling handle given to every task.
pub struct PoolHandle<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for PoolHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> PoolHandle<S> {
    pub fn schedule_work<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce(&mut S, &PoolHandle<S>) + Send + 'static,
    {
        self.shared.schedule(Box::new(task))
    }

    /// Same as [`ThreadPool::wait_for_all`]; fails inside a task of this pool.
    pub fn wait_for_all(&self) -> Result<(), PoolError> {
        self.shared.wait_for_all()
    }

    pub fn num_workers(&self) -> usize {
        self.shared.queues.len()
    }
}

pub struct ThreadPool<S: Send + 'static> {
    shared: Arc<Shared<S>>,
    workers: Vec<JoinHandle<()>>,
}

impl<S: Send + 'static> ThreadPool<S> {
    /// Starts `num_workers` threads; worker `i` owns `init(i)`.
    pub fn new<F>(num_workers: usize, mut init: F) -> Result<Self, PoolError>
    where
        F: FnMut(usize) -> S,
    {
        if num_workers == 0 {
            return Err(PoolError::EmptyPool);
        }

        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queues: (0..num_workers).map(|_| WorkerQueue::new()).collect(),
            next: AtomicUsize::new(0),
            active: Mutex::new(0),
            all_done: Condvar::new(),
            panic: Mutex::new(None),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(num_workers),
        };

        for id in 0..num_workers {
            let state = init(id);
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("route-worker-{}", id))
                .spawn(move || worker_loop(id, state, shared));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    let _ = pool.shutdown(false);
                    return Err(PoolError::Spawn(e.to_string()));
                }
            }
        }

        log::debug!("Started thread pool with {} workers", num_workers);
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.shared.queues.len()
    }

    pub fn handle(&self) -> PoolHandle<S> {
        PoolHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queues `task` on the next worker in round-robin order and wakes only that worker.
    pub fn schedule_work<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce(&mut S, &PoolHandle<S>) + Send + 'static,
    {
        self.shared.schedule(Box::new(task))
    }

    /// Blocks until every scheduled task, including ones scheduled by tasks,
    /// has finished. Returns the first task panic since the previous wait.
    pub fn wait_for_all(&self) -> Result<(), PoolError> {
        self.shared.wait_for_all()
    }

    /// Stops the workers. With `drain` queued tasks run first, otherwise
    /// they are dropped unrun. Calling it twice is a no-op.
    pub fn shutdown(&mut self, drain: bool) -> Result<(), PoolError> {
        if self.workers.is_empty() {
            return Ok(());
        }
        if CURRENT_POOL.with(|c| c.get()) == self.shared.id {
            return Err(PoolError::WaitFromWorker);
        }

        let waited = if drain {
            self.shared.wait_for_all()
        } else {
            Ok(())
        };

        let mut discarded = 0;
        for queue in &self.shared.queues {
            let dropped = {
                let mut st = lock(&queue.state);
                st.closed = true;
                std::mem::take(&mut st.tasks)
            };
            discarded += dropped.len();
            drop(dropped);
            queue.ready.notify_all();
        }
        for _ in 0..discarded {
            self.shared.finish_one();
        }
        if discarded > 0 {
            log::warn!("Thread pool shut down with {} queued tasks discarded", discarded);
        }

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("Route worker exited abnormally");
            }
        }
        waited
    }
}

impl<S: Send + 'static> Drop for ThreadPool<S> {
    fn drop(&mut self) {
        let _ = self.shutdown(false);
    }
}

fn worker_loop<S>(id: usize, mut state: S, shared: Arc<Shared<S>>) {
    CURRENT_POOL.with(|c| c.set(shared.id));
    let handle = PoolHandle {
        shared: Arc::clone(&shared),
    };
    let queue = &shared.queues[id];

    loop {
        let task = {
            let mut st = lock(&queue.state);
            loop {
                if let Some(t) = st.tasks.pop_front() {
                    break Some(t);
                }
                if st.closed {
                    break None;
                }
                st = queue.ready.wait(st).unwrap_or_else(PoisonError::into_inner);
            }
        };
        let Some(task) = task else {
            break;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| task(&mut state, &handle)));
        if let Err(payload) = result {
            let message = panic_message(payload.as_ref());
            log::error!("Route worker {} task panicked: {}", id, message);
            let mut slot = lock(&shared.panic);
            if slot.is_none() {
                *slot = Some(PoolError::TaskPanicked { worker: id, message });
            }
        }
        shared.finish_one();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn every_task_runs_exactly_once() {
        for &workers in &[1usize, 2, 3, 4, 7, 8, 16, 33, 64] {
            let pool = ThreadPool::new(workers, |_| ()).unwrap();
            for &n in &[0usize, 1, 17, 1000, 10_000] {
                let counter = Arc::new(AtomicUsize::new(0));
                for _ in 0..n {
                    let counter = Arc::clone(&counter);
                    pool.schedule_work(move |_, _| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
                }
                pool.wait_for_all().unwrap();
                assert_eq!(counter.load(Ordering::Relaxed), n, "{} workers", workers);
            }
        }
    }

    fn spawn_tree(handle: &PoolHandle<()>, depth: u32, counter: Arc<AtomicUsize>) {
        counter.fetch_add(1, Ordering::Relaxed);
        if depth == 0 {
            return;
        }
        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            handle
                .schedule_work(move |_, h| spawn_tree(h, depth - 1, counter))
                .unwrap();
        }
    }

    #[test]
    fn tasks_scheduled_from_tasks_are_awaited() {
        let pool = ThreadPool::new(4, |_| ()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.schedule_work(move |_, h| spawn_tree(h, 10, c)).unwrap();
        pool.wait_for_all().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 2047);
    }

    #[test]
    fn round_robin_hands_out_worker_state() {
        let pool = ThreadPool::new(5, |id| id).unwrap();
        let seen = Arc::new(Mutex::new(vec![0usize; 5]));
        for _ in 0..20 {
            let seen = Arc::clone(&seen);
            pool.schedule_work(move |id: &mut usize, _| {
                seen.lock().unwrap()[*id] += 1;
            })
            .unwrap();
        }
        pool.wait_for_all().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![4; 5]);
    }

    #[test]
    fn panic_is_returned_to_waiter_and_pool_survives() {
        let pool = ThreadPool::new(3, |_| ()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.schedule_work(|_, _| panic!("boom")).unwrap();
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.schedule_work(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        match pool.wait_for_all() {
            Err(PoolError::TaskPanicked { worker, message }) => {
                assert_eq!(worker, 0);
                assert_eq!(message, "boom");
            }
            other => panic!("expected a task panic, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::Relaxed), 100);

        pool.schedule_work(|_, _| {}).unwrap();
        assert_eq!(pool.wait_for_all(), Ok(()));
    }

    #[test]
    fn waiting_from_a_task_is_rejected() {
        let pool = ThreadPool::new(2, |_| ()).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.schedule_work(move |_, h| {
            tx.send(h.wait_for_all()).unwrap();
        })
        .unwrap();
        pool.wait_for_all().unwrap();
        assert_eq!(rx.recv().unwrap(), Err(PoolError::WaitFromWorker));
    }

    #[test]
    fn shutdown_without_drain_discards_queued_tasks() {
        let mut pool = ThreadPool::new(1, |_| ()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<()>();
        pool.schedule_work(move |_, _| {
            let _ = rx.recv();
        })
        .unwrap();
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.schedule_work(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let _ = tx.send(());
        });
        pool.shutdown(false).unwrap();
        release.join().unwrap();

        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert_eq!(pool.schedule_work(|_, _| {}), Err(PoolError::ShutDown));
        assert_eq!(pool.wait_for_all(), Ok(()));
    }

    #[test]
    fn shutdown_with_drain_runs_queued_tasks() {
        let mut pool = ThreadPool::new(2, |_| ()).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.schedule_work(move |_, _| {
                thread::sleep(Duration::from_micros(200));
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.shutdown(true).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 50);
        assert_eq!(pool.shutdown(true), Ok(()));
    }

    #[test]
    fn empty_pool_is_an_error() {
        assert!(matches!(
            ThreadPool::new(0, |_| ()),
            Err(PoolError::EmptyPool)
        ));
    }
}
