//! Routing workers.
//!
//! A fixed set of OS threads, each driving its own single-threaded tokio
//! runtime as an event loop. Worker `i` permanently owns shard `i` of every
//! server's connection pool, so anything that touches a shard from outside
//! must be sent to the owning worker as a task.
//!
//! ```text
//! RoutingWorkers
//!   ├── worker 0: current-thread runtime ← task queue
//!   ├── worker 1: current-thread runtime ← task queue
//!   └── ...
//! broadcast(task) → one copy per worker → wait for every acknowledgement
//! ```

use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Index of a routing worker; equal to the shard it owns.
pub type WorkerId = usize;

type Task = Box<dyn FnOnce(WorkerId) + Send + 'static>;

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Id of the routing worker running on the calling thread, if any.
pub fn current_worker_id() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

pub struct RoutingWorkers {
    senders: Vec<mpsc::UnboundedSender<Task>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl RoutingWorkers {
    /// Spawn `count` workers.
    pub fn start(count: usize) -> std::io::Result<Self> {
        let mut senders = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for id in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = thread::Builder::new()
                .name(format!("sqlgate-worker-{id}"))
                .spawn(move || run_worker(id, rx))?;
            senders.push(tx);
            handles.push(handle);
        }

        info!(workers = count, "routing workers started");
        Ok(Self {
            senders,
            handles: Mutex::new(handles),
        })
    }

    pub fn count(&self) -> usize {
        self.senders.len()
    }

    /// Queue `task` on worker `id`. Returns `false` if the worker is gone.
    pub fn execute_on<F>(&self, id: WorkerId, task: F) -> bool
    where
        F: FnOnce(WorkerId) + Send + 'static,
    {
        match self.senders.get(id) {
            Some(tx) => tx.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Run `f` on worker `id` and wait for its result.
    ///
    /// Blocks the calling thread, so it returns `None` without running `f`
    /// when called from a routing worker or from inside an async runtime.
    pub fn call_on<F, R>(&self, id: WorkerId, f: F) -> Option<R>
    where
        F: FnOnce(WorkerId) -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.may_block() {
            return None;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let queued = self.execute_on(id, move |worker| {
            let _ = ack_tx.send(f(worker));
        });
        if !queued {
            return None;
        }
        ack_rx.blocking_recv().ok()
    }

    /// Run `f` once on every worker and wait until all of them are done.
    ///
    /// Returns the results of the workers that ran the task. A worker that
    /// cannot run it is treated as idle and is not retried. Called from a
    /// routing worker or from inside an async runtime it runs nothing and
    /// returns an empty result; use [`broadcast_async`](Self::broadcast_async)
    /// from async code.
    pub fn broadcast<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(WorkerId) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        if !self.may_block() {
            return Vec::new();
        }
        self.scatter(f)
            .into_iter()
            .filter_map(|(id, rx)| acknowledged(id, rx.blocking_recv()))
            .collect()
    }

    /// Async flavour of [`broadcast`](Self::broadcast).
    pub async fn broadcast_async<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(WorkerId) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        if self.called_from_worker() {
            return Vec::new();
        }
        let mut results = Vec::with_capacity(self.count());
        for (id, rx) in self.scatter(f) {
            if let Some(r) = acknowledged(id, rx.await) {
                results.push(r);
            }
        }
        results
    }

    /// Stop accepting tasks and join every worker thread.
    pub fn shutdown(self) {
        let RoutingWorkers { senders, handles } = self;
        drop(senders);

        let handles = handles.into_inner().unwrap_or_else(PoisonError::into_inner);
        for (id, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                error!(worker = id, "routing worker panicked");
            }
        }
        info!("routing workers stopped");
    }

    fn scatter<F, R>(&self, f: F) -> Vec<(WorkerId, oneshot::Receiver<R>)>
    where
        F: Fn(WorkerId) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let mut pending = Vec::with_capacity(self.count());

        for (id, tx) in self.senders.iter().enumerate() {
            let (ack_tx, ack_rx) = oneshot::channel();
            let f = Arc::clone(&f);
            let task: Task = Box::new(move |worker| {
                let _ = ack_tx.send(f(worker));
            });
            if tx.send(task).is_ok() {
                pending.push((id, ack_rx));
            } else {
                debug!(worker = id, "worker unavailable, treating as idle");
            }
        }
        pending
    }

    /// Blocking waits would deadlock a worker and panic inside a runtime.
    fn may_block(&self) -> bool {
        if self.called_from_worker() {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            warn!("blocking cross-worker wait requested from async context, ignored");
            return false;
        }
        true
    }

    fn called_from_worker(&self) -> bool {
        match current_worker_id() {
            Some(id) => {
                warn!(worker = id, "cross-worker wait requested from a routing worker, ignored");
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for RoutingWorkers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingWorkers")
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

fn acknowledged<R>(id: WorkerId, result: Result<R, oneshot::error::RecvError>) -> Option<R> {
    match result {
        Ok(r) => Some(r),
        Err(_) => {
            debug!(worker = id, "worker dropped task, treating as idle");
            None
        }
    }
}

fn run_worker(id: WorkerId, mut rx: mpsc::UnboundedReceiver<Task>) {
    CURRENT_WORKER.with(|current| current.set(Some(id)));

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker = id, error = %e, "failed to start worker event loop");
            return;
        }
    };

    runtime.block_on(async move {
        while let Some(task) = rx.recv().await {
            task(id);
        }
    });
    debug!(worker = id, "routing worker exited");
}
