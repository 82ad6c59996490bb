use std::cell::RefCell;
use std::io;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Msg {
    Run(Job),
    Stop,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<WorkerHandle>> = const { RefCell::new(None) };
}

/// A handle to a [`Worker`] event loop.
///
/// Handles are cheap to clone and can be sent across threads; they are
/// how background jobs deliver completions back to the worker that
/// issued the work.
#[derive(Clone)]
pub struct WorkerHandle {
    name: Arc<str>,
    tx: Sender<Msg>,
}

impl WorkerHandle {
    /// Enqueues a job on the worker.  Jobs posted from one thread run in
    /// the order they were posted.
    ///
    /// Returns false if the worker has already shut down, in which case
    /// the job is dropped without running.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Msg::Run(Box::new(job))).is_ok()
    }

    /// The name the worker was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An owned event-loop thread.
///
/// The loop drains posted jobs in FIFO order.  Dropping the worker stops
/// the loop after the jobs already queued have run, then joins the
/// thread.
pub struct Worker {
    handle: WorkerHandle,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a new worker event loop.
    pub fn spawn(name: &str) -> io::Result<Worker> {
        let (tx, rx) = unbounded::<Msg>();
        let handle = WorkerHandle {
            name: Arc::from(name),
            tx,
        };
        let loop_handle = handle.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_event_loop(loop_handle, rx))?;
        Ok(Worker {
            handle,
            thread: Some(thread),
        })
    }

    /// Returns a handle to the worker whose event loop is running the
    /// calling code, if any.
    pub fn current() -> Option<WorkerHandle> {
        CURRENT_WORKER.with(|current| current.borrow().clone())
    }

    /// Returns a handle to this worker.
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.handle.tx.send(Msg::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_event_loop(handle: WorkerHandle, rx: Receiver<Msg>) {
    CURRENT_WORKER.with(|current| *current.borrow_mut() = Some(handle));
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Run(job) => job(),
            Msg::Stop => break,
        }
    }
    CURRENT_WORKER.with(|current| *current.borrow_mut() = None);
}

/// A fixed-size pool of background threads for blocking work.
pub struct ThreadPool {
    tx: Sender<Job>,
    threads: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `size` threads.
    pub fn new(size: usize) -> io::Result<ThreadPool> {
        let (tx, rx) = unbounded::<Job>();
        let mut threads = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let thread = thread::Builder::new()
                .name(format!("cache-pool-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })?;
            threads.push(thread);
        }
        Ok(ThreadPool { tx, threads })
    }

    /// Runs `job` on one of the pool threads.  No ordering is guaranteed
    /// across jobs.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            debug!("thread pool is shut down, dropping job");
        }
    }

    /// Number of threads in the pool.
    pub fn size(&self) -> usize {
        self.threads.len()
    }
}

/// The process-wide pool used for remote I/O jobs.
pub fn thread_pool() -> &'static ThreadPool {
    static POOL: OnceLock<ThreadPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let size = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        ThreadPool::new(size).expect("failed to spawn the cache thread pool")
    })
}
