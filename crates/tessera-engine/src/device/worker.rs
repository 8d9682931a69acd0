//! Single-consumer worker thread fed by a bounded FIFO queue.
//!
//! Used twice by the engine: once for GPU tasks (state = native backend)
//! and once for completion callbacks (no state).
//!
//! Shutdown protocol:
//! - set the stop flag
//! - enqueue a wake-up item so a blocked `recv` returns
//! - join the thread
//!
//! Items still queued behind the wake-up are dropped unexecuted.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::Sender;

use super::error::{EngineError, EngineResult};

enum Job<T> {
    Run(T),
    Wake,
}

/// Counters for one worker. Relaxed; intended for diagnostics.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    pub submitted: AtomicU64,
    pub executed: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub submitted: u64,
    pub executed: u64,
    /// Items whose handler returned an error or panicked.
    pub failed: u64,
    /// Items rejected because the worker had shut down.
    pub dropped: u64,
}

pub(crate) struct Worker<T: Send + 'static> {
    name: String,
    tx: Sender<Job<T>>,
    stop: Arc<AtomicBool>,
    counters: Arc<WorkerCounters>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawns the thread and runs `init` on it.
    ///
    /// Returns once `init` has finished. If it fails (or panics) the thread
    /// exits and the error is returned as [`EngineError::Init`].
    pub fn spawn<S, I, H>(name: &str, capacity: usize, init: I, mut handler: H) -> EngineResult<Self>
    where
        S: 'static,
        I: FnOnce() -> anyhow::Result<S> + Send + 'static,
        H: FnMut(&mut S, T) -> anyhow::Result<()> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded::<Job<T>>(capacity.max(1));
        let (init_tx, init_rx) = crossbeam_channel::bounded::<anyhow::Result<()>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(WorkerCounters::default());

        let thread_stop = Arc::clone(&stop);
        let thread_counters = Arc::clone(&counters);
        let label = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => {
                        let _ = init_tx.send(Ok(()));
                        state
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                drop(init_tx);
                log::debug!("{label}: started");

                while !thread_stop.load(Ordering::Acquire) {
                    let Ok(job) = rx.recv() else { break };
                    let Job::Run(item) = job else { continue };

                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut state, item)));
                    thread_counters.executed.fetch_add(1, Ordering::Relaxed);
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            thread_counters.failed.fetch_add(1, Ordering::Relaxed);
                            log::error!("{label}: task failed: {err:#}");
                        }
                        Err(payload) => {
                            thread_counters.failed.fetch_add(1, Ordering::Relaxed);
                            log::error!("{label}: task panicked: {}", panic_message(payload.as_ref()));
                        }
                    }
                }

                let pending = rx.len();
                if pending > 0 {
                    log::debug!("{label}: discarding {pending} queued item(s)");
                }
                drop(state);
                log::debug!("{label}: stopped");
            })
            .map_err(|source| EngineError::Spawn { name: name.to_string(), source })?;

        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = handle.join();
                return Err(EngineError::Init(err));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(EngineError::Init(anyhow::anyhow!("`{name}` panicked during initialization")));
            }
        }

        Ok(Self {
            name: name.to_string(),
            tx,
            stop,
            counters,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues an item, blocking while the queue is full.
    ///
    /// After shutdown the item is dropped and `false` is returned.
    pub fn submit(&self, item: T) -> bool {
        if self.stop.load(Ordering::Acquire) {
            self.reject();
            return false;
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Job::Run(item)).is_err() {
            self.reject();
            return false;
        }
        true
    }

    fn reject(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        log::trace!("{}: item dropped after shutdown", self.name);
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn is_shut_down(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stops the thread and waits for the in-flight item to finish.
    ///
    /// Idempotent. Called from the worker itself it only raises the flag.
    pub fn shutdown(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            log::debug!("{}: shutdown requested", self.name);
            // Fails only when the thread is already gone.
            let _ = self.tx.send(Job::Wake);
        }

        if self.is_current_thread() {
            log::warn!("{}: shutdown from own thread; not joining", self.name);
            return;
        }

        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("{}: thread terminated abnormally", self.name);
            }
        }
    }
}

impl<T: Send + 'static> Drop for Worker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
