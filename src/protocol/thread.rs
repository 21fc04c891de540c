use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use log::{debug, warn};

/// Fixed set of long-running worker threads sharing one run flag.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    running: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawns `size` threads, each running `task(id, running)`. Tasks are
    /// expected to return once `running` turns false.
    pub fn new<F>(size: usize, task: F) -> Self
    where
        F: Fn(usize, &AtomicBool) + Send + Sync + 'static,
    {
        assert!(size > 0);

        let task = Arc::new(task);
        let running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::with_capacity(size);

        for i in 0..size {
            workers.push(Worker::new(i, Arc::clone(&task), Arc::clone(&running)));
        }

        Self { workers, running }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the run flag and joins every worker.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                warn!("worker {} panicked", worker.id);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new<F>(id: usize, task: Arc<F>, running: Arc<AtomicBool>) -> Self
    where
        F: Fn(usize, &AtomicBool) + Send + Sync + 'static,
    {
        let thread = thread::spawn(move || {
            debug!("worker {id} started");
            task(id, &running);
            debug!("worker {id} stopped");
        });

        Self { id, thread }
    }
}
