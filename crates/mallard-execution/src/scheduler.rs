//! Task scheduler: a pool of background workers draining per-producer task
//! queues.
//!
//! Every executor creates its own `ProducerToken`; the thread driving the
//! query pulls tasks of its own producer while the workers take tasks from
//! any producer. Without threads the scheduler degrades to one locked queue
//! drained only by the driving thread.

use mallard_common::{Config, Error, Result};
use crossbeam::deque::{Injector, Steal};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// A unit of schedulable work
pub trait Task: Send {
    fn execute(self: Box<Self>);
}

type TaskQueue = Injector<Box<dyn Task>>;

/// Scopes the tasks of one executor
pub struct ProducerToken {
    id: usize,
    queue: Arc<TaskQueue>,
}

impl ProducerToken {
    pub fn id(&self) -> usize {
        self.id
    }
}

/// Counting semaphore workers sleep on while no task is queued
#[derive(Default)]
struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    fn signal(&self) {
        *self.count.lock() += 1;
        self.available.notify_one();
    }

    /// Takes one permit, waiting at most `timeout` for it
    fn wait(&self, timeout: Duration) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            self.available.wait_for(&mut count, timeout);
        }
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

/// Wakes threads driving a query whenever a worker finishes or schedules
/// a task
#[derive(Default)]
struct Progress {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Progress {
    fn notify(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Waits at most `timeout` for progress after `seen`
    fn wait_since(&self, seen: u64, timeout: Duration) {
        let mut generation = self.generation.lock();
        if *generation == seen {
            self.changed.wait_for(&mut generation, timeout);
        }
    }
}

enum QueueMode {
    Concurrent {
        producers: Mutex<Vec<Weak<TaskQueue>>>,
        semaphore: Semaphore,
        progress: Progress,
    },
    /// Single-threaded fallback: one queue shared by every producer
    Locked(Mutex<VecDeque<Box<dyn Task>>>),
}

struct SchedulerShared {
    mode: QueueMode,
    task_timeout: Duration,
    next_producer: AtomicUsize,
}

impl SchedulerShared {
    fn pop(queue: &TaskQueue) -> Option<Box<dyn Task>> {
        loop {
            match queue.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Takes a task of any live producer, starting at a rotating offset
    fn try_dequeue(&self) -> Option<Box<dyn Task>> {
        match &self.mode {
            QueueMode::Concurrent { producers, .. } => {
                let queues: Vec<Arc<TaskQueue>> = {
                    let mut producers = producers.lock();
                    producers.retain(|p| p.strong_count() > 0);
                    producers.iter().filter_map(Weak::upgrade).collect()
                };
                if queues.is_empty() {
                    return None;
                }
                let start = self.next_producer.fetch_add(1, Ordering::Relaxed) % queues.len();
                (0..queues.len()).find_map(|i| Self::pop(&queues[(start + i) % queues.len()]))
            }
            QueueMode::Locked(queue) => queue.lock().pop_front(),
        }
    }

    fn execute_forever(&self, marker: &AtomicBool) {
        let QueueMode::Concurrent {
            semaphore,
            progress,
            ..
        } = &self.mode
        else {
            return;
        };
        while marker.load(Ordering::Acquire) {
            semaphore.wait(self.task_timeout);
            if let Some(task) = self.try_dequeue() {
                task.execute();
                progress.notify();
            }
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    marker: Arc<AtomicBool>,
}

pub struct TaskScheduler {
    shared: Arc<SchedulerShared>,
    workers: Mutex<Vec<Worker>>,
    producer_ids: AtomicUsize,
}

impl TaskScheduler {
    /// Creates the scheduler and launches `config.threads - 1` workers
    pub fn new(config: &Config) -> Result<Self> {
        let mode = if config.enable_threads {
            QueueMode::Concurrent {
                producers: Mutex::new(Vec::new()),
                semaphore: Semaphore::default(),
                progress: Progress::default(),
            }
        } else {
            QueueMode::Locked(Mutex::new(VecDeque::new()))
        };
        let scheduler = TaskScheduler {
            shared: Arc::new(SchedulerShared {
                mode,
                task_timeout: config.task_timeout,
                next_producer: AtomicUsize::new(0),
            }),
            workers: Mutex::new(Vec::new()),
            producer_ids: AtomicUsize::new(0),
        };
        if config.enable_threads {
            scheduler.set_threads(config.threads)?;
        }
        Ok(scheduler)
    }

    pub fn create_producer(&self) -> ProducerToken {
        let queue = Arc::new(TaskQueue::new());
        if let QueueMode::Concurrent { producers, .. } = &self.shared.mode {
            producers.lock().push(Arc::downgrade(&queue));
        }
        ProducerToken {
            id: self.producer_ids.fetch_add(1, Ordering::Relaxed),
            queue,
        }
    }

    /// Enqueues `task` for `token` and wakes one sleeping worker
    pub fn schedule_task(&self, token: &ProducerToken, task: Box<dyn Task>) {
        match &self.shared.mode {
            QueueMode::Concurrent {
                semaphore,
                progress,
                ..
            } => {
                token.queue.push(task);
                semaphore.signal();
                progress.notify();
            }
            QueueMode::Locked(queue) => queue.lock().push_back(task),
        }
    }

    /// Takes the next task scheduled through `token`
    pub fn get_task_from_producer(&self, token: &ProducerToken) -> Option<Box<dyn Task>> {
        match &self.shared.mode {
            QueueMode::Concurrent { .. } => SchedulerShared::pop(&token.queue),
            QueueMode::Locked(queue) => queue.lock().pop_front(),
        }
    }

    /// Takes the next task of `token`. When none is queued, parks for at
    /// most the task timeout until a worker finishes or schedules a task,
    /// then tries once more.
    pub fn wait_for_task(&self, token: &ProducerToken) -> Option<Box<dyn Task>> {
        let QueueMode::Concurrent { progress, .. } = &self.shared.mode else {
            return self.get_task_from_producer(token);
        };
        let seen = progress.generation();
        if let Some(task) = SchedulerShared::pop(&token.queue) {
            return Some(task);
        }
        progress.wait_since(seen, self.shared.task_timeout);
        SchedulerShared::pop(&token.queue)
    }

    /// Background workers plus the driving thread
    pub fn number_of_threads(&self) -> usize {
        self.workers.lock().len() + 1
    }

    /// Grows or shrinks the pool to `n - 1` workers; removed workers are
    /// joined before this returns
    pub fn set_threads(&self, n: usize) -> Result<()> {
        if n < 1 {
            return Err(Error::InvalidArguments(
                "must have at least 1 thread".to_string(),
            ));
        }
        if matches!(self.shared.mode, QueueMode::Locked(_)) {
            if n > 1 {
                return Err(Error::NotImplemented(
                    "setting threads with threads disabled".to_string(),
                ));
            }
            return Ok(());
        }

        let target = n - 1;
        let mut workers = self.workers.lock();
        if workers.len() == target {
            return Ok(());
        }
        let previous = workers.len();
        if workers.len() < target {
            for i in workers.len()..target {
                let marker = Arc::new(AtomicBool::new(true));
                let shared = Arc::clone(&self.shared);
                let thread_marker = Arc::clone(&marker);
                let handle = std::thread::Builder::new()
                    .name(format!("mallard-worker-{}", i))
                    .spawn(move || shared.execute_forever(&thread_marker))
                    .map_err(|e| Error::Internal(format!("could not spawn worker: {}", e)))?;
                workers.push(Worker { handle, marker });
            }
        } else {
            let removed = workers.split_off(target);
            for worker in &removed {
                worker.marker.store(false, Ordering::Release);
            }
            for worker in removed {
                if worker.handle.join().is_err() {
                    debug!("worker thread panicked before shutdown");
                }
            }
        }
        info!(from = previous + 1, to = n, "scheduler threads changed");
        Ok(())
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        if self.set_threads(1).is_err() {
            debug!("could not stop scheduler workers");
        }
    }
}
