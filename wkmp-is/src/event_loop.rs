//! Producer-side event loop and deferred calls
//!
//! The I/O thread that owns a non-blocking source is modelled as a single
//! worker thread draining a FIFO job queue. Anything that must run "on the
//! producer context" (resume, seek, data pumping) is posted here.
//!
//! A [`DeferredCall`] is a reusable, cancellable "run this callback once on
//! the loop" trigger:
//! - `schedule()` arms it; arming an already armed call is a no-op
//! - the callback runs at most once per arm
//! - `cancel()` disarms without waiting; `cancel_blocking()` also waits for an
//!   invocation that is already running (unless called from the loop itself)

use crate::error::{Result, StreamError};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct LoopQueue {
    jobs: VecDeque<Job>,
    stopping: bool,
}

/// State shared between the loop thread and its handles
struct LoopShared {
    name: String,

    /// Pending jobs plus stop flag
    queue: Mutex<LoopQueue>,

    /// Signalled when a job is queued or shutdown is requested
    condvar: Condvar,

    /// Loop thread identity, set right after spawn
    thread_id: OnceLock<ThreadId>,
}

impl LoopShared {
    fn lock_queue(&self) -> MutexGuard<'_, LoopQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dedicated producer thread
///
/// Dropping the loop requests shutdown, lets already queued jobs finish and
/// joins the thread.
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the loop thread
    pub fn start(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(LoopShared {
            name: name.to_string(),
            queue: Mutex::new(LoopQueue {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            condvar: Condvar::new(),
            thread_id: OnceLock::new(),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::worker_loop(worker))?;
        // No handle has been given out yet, so no job can observe an unset id
        let _ = shared.thread_id.set(thread.thread().id());

        info!("Event loop '{}' started", name);

        Ok(Self {
            handle: EventLoopHandle { shared },
            thread: Some(thread),
        })
    }

    /// Cloneable handle for posting work
    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Stop accepting work, drain the queue and join the thread
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        {
            let mut queue = self.handle.shared.lock_queue();
            queue.stopping = true;
        }
        self.handle.shared.condvar.notify_all();

        if let Some(thread) = self.thread.take() {
            if self.handle.is_inside() {
                // Dropped from one of its own jobs; the thread exits on its own
                return;
            }
            if thread.join().is_err() {
                error!("Event loop '{}' thread panicked", self.handle.shared.name);
            }
            info!("Event loop '{}' stopped", self.handle.shared.name);
        }
    }

    fn worker_loop(shared: Arc<LoopShared>) {
        debug!("Event loop '{}' worker running", shared.name);

        loop {
            let job = {
                let mut queue = shared.lock_queue();

                // Wait for work or shutdown signal
                while queue.jobs.is_empty() && !queue.stopping {
                    queue = shared
                        .condvar
                        .wait(queue)
                        .unwrap_or_else(PoisonError::into_inner);
                }

                match queue.jobs.pop_front() {
                    Some(job) => job,
                    // Stopping and drained
                    None => break,
                }
            };

            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("Event loop '{}' job panicked", shared.name);
            }
        }

        debug!("Event loop '{}' worker exiting", shared.name);
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// Handle to post work onto an [`EventLoop`]
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<LoopShared>,
}

impl std::fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl EventLoopHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// True when called from the loop thread
    pub fn is_inside(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Queue a job
    ///
    /// # Errors
    /// - `StreamError::EventLoopStopped` once shutdown has been requested
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.shared.lock_queue();
            if queue.stopping {
                return Err(StreamError::EventLoopStopped);
            }
            queue.jobs.push_back(Box::new(job));
        }
        self.shared.condvar.notify_one();
        Ok(())
    }

    /// Run `f` on the loop and wait for its result
    ///
    /// Runs inline when already on the loop thread.
    pub fn call_blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_inside() {
            return Ok(f());
        }

        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.post(move || {
            let _ = tx.send(f());
        })?;
        // Sender dropped without a value means the job panicked or was never run
        rx.recv().map_err(|_| StreamError::EventLoopStopped)
    }
}

#[derive(Default)]
struct DeferredState {
    armed: bool,
    running: bool,
}

struct DeferredInner {
    name: &'static str,
    state: Mutex<DeferredState>,
    /// Signalled when a running invocation finishes
    idle: Condvar,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl DeferredInner {
    fn lock_state(&self) -> MutexGuard<'_, DeferredState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self) {
        {
            let mut state = self.lock_state();
            if !state.armed {
                // Cancelled after being queued
                return;
            }
            state.armed = false;
            state.running = true;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.callback)()));

        {
            let mut state = self.lock_state();
            state.running = false;
        }
        self.idle.notify_all();

        if let Err(payload) = result {
            panic::resume_unwind(payload);
        }
    }
}

/// Cancellable one-shot callback bound to an event loop
pub struct DeferredCall {
    inner: Arc<DeferredInner>,
    event_loop: EventLoopHandle,
}

impl DeferredCall {
    pub fn new<F>(event_loop: EventLoopHandle, name: &'static str, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DeferredInner {
                name,
                state: Mutex::new(DeferredState::default()),
                idle: Condvar::new(),
                callback: Box::new(callback),
            }),
            event_loop,
        }
    }

    /// Arm the call; no-op while already armed
    ///
    /// # Returns
    /// `true` if this call armed it, `false` if it was already armed
    pub fn schedule(&self) -> Result<bool> {
        {
            let mut state = self.inner.lock_state();
            if state.armed {
                return Ok(false);
            }
            state.armed = true;
        }

        let inner = Arc::clone(&self.inner);
        if let Err(e) = self.event_loop.post(move || inner.fire()) {
            self.inner.lock_state().armed = false;
            return Err(e);
        }
        Ok(true)
    }

    /// Disarm without waiting for a running invocation
    pub fn cancel(&self) {
        self.inner.lock_state().armed = false;
    }

    /// Disarm and wait until no invocation is running
    ///
    /// From the loop thread itself this cannot wait (the running invocation
    /// is the caller), so it only disarms.
    pub fn cancel_blocking(&self) {
        let mut state = self.inner.lock_state();
        state.armed = false;

        if self.event_loop.is_inside() {
            return;
        }

        while state.running {
            state = self
                .inner
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Armed and not yet run
    pub fn is_pending(&self) -> bool {
        self.inner.lock_state().armed
    }
}

impl std::fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCall")
            .field("name", &self.inner.name)
            .field("loop", &self.event_loop.name())
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl Drop for DeferredCall {
    fn drop(&mut self) {
        self.cancel();
    }
}
