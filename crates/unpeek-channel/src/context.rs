//! The designated execution context.
//!
//! Every subscriber callback runs, and every ledger mutation happens, on one
//! designated context. Producers on other threads reach it through a
//! [`Dispatcher`], which queues a [`Job`] to run there later.
//!
//! Two dispatchers ship with the crate:
//!
//! - [`MainContext`]: a queue bound to the thread that created it. Drain it
//!   synchronously with [`MainContext::run_pending`] from an existing loop,
//!   or drive it with [`MainContext::run`] on a current-thread runtime.
//! - [`InlineDispatcher`]: runs jobs immediately on the calling thread. Only
//!   suitable when every producer already lives on the designated thread.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{ChannelError, ChannelResult};

/// Work scheduled onto the designated context.
pub type Job = Box<dyn FnOnce() -> ChannelResult<()> + Send + 'static>;

/// Default queue depth at which [`MainContext`] starts logging a backlog warning.
pub const DEFAULT_QUEUE_WARN_THRESHOLD: usize = 1024;

/// Capability to run work on the designated context.
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Schedule `job` to run on the designated context.
    fn dispatch(&self, job: Job);

    /// Whether the calling thread is the designated context.
    fn is_current(&self) -> bool;
}

/// Dispatcher that runs every job immediately on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        if let Err(e) = job() {
            warn!(error = %e, "Inline job failed");
        }
    }

    fn is_current(&self) -> bool {
        true
    }
}

/// A job queue bound to the thread that created it.
pub struct MainContext {
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    thread: ThreadId,
    queued: AtomicUsize,
    warn_threshold: usize,
}

impl fmt::Debug for MainContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainContext")
            .field("thread", &self.thread)
            .field("queued", &self.pending())
            .field("warn_threshold", &self.warn_threshold)
            .finish()
    }
}

impl MainContext {
    /// Create a context designating the current thread.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_warn_threshold(DEFAULT_QUEUE_WARN_THRESHOLD)
    }

    /// Create a context that warns once its queue reaches `threshold` jobs.
    #[must_use]
    pub fn with_warn_threshold(threshold: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            sender,
            receiver: Mutex::new(receiver),
            thread: std::thread::current().id(),
            queued: AtomicUsize::new(0),
            warn_threshold: threshold.max(1),
        })
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Run every queued job on the calling thread.
    ///
    /// Jobs queued by the jobs themselves run in the same pass. Returns the
    /// number of jobs run, or the first job error once the queue is empty.
    /// A nested call made while a drain is already in progress returns
    /// `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::OffContext`] when called off the designated
    /// thread, or the first error any job returned.
    pub fn run_pending(&self) -> ChannelResult<usize> {
        if !self.is_current() {
            return Err(ChannelError::OffContext {
                channel: "main-context".to_owned(),
                operation: "run_pending",
            });
        }
        let Ok(mut receiver) = self.receiver.try_lock() else {
            trace!("Drain already in progress");
            return Ok(0);
        };

        let mut ran: usize = 0;
        let mut first_error = None;
        while let Ok(job) = receiver.try_recv() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            ran = ran.saturating_add(1);
            if let Err(e) = job() {
                warn!(error = %e, "Main context job failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(ran),
        }
    }

    /// Drive the queue until `shutdown` is cancelled.
    ///
    /// Must be polled on the designated thread, e.g. inside a current-thread
    /// runtime. Job errors are logged; the loop keeps running.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.is_current() {
            warn!("Main context driven off its designated thread");
        }
        let mut receiver = self.receiver.lock().await;
        debug!("Main context loop started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                job = receiver.recv() => {
                    let Some(job) = job else { break };
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    if let Err(e) = job() {
                        warn!(error = %e, "Main context job failed");
                    }
                },
            }
        }
        debug!("Main context loop stopped");
    }
}

impl Dispatcher for MainContext {
    fn dispatch(&self, job: Job) {
        let depth = self.queued.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if self.sender.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            warn!("Main context queue closed, job dropped");
            return;
        }
        if depth >= self.warn_threshold && depth.is_multiple_of(self.warn_threshold) {
            warn!(depth, "Main context backlog growing");
        }
    }

    fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_inline_runs_immediately() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        InlineDispatcher.dispatch(Box::new(move || {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        }));
        assert!(ran.load(Ordering::SeqCst));
        assert!(InlineDispatcher.is_current());
    }

    #[test]
    fn test_main_context_queues_until_drained() {
        let ctx = MainContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            ctx.dispatch(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert_eq!(ctx.pending(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert_eq!(ctx.run_pending().unwrap(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.pending(), 0);
    }

    #[test]
    fn test_main_context_is_thread_bound() {
        let ctx = MainContext::new();
        assert!(ctx.is_current());

        let remote = Arc::clone(&ctx);
        let (current, drained) = std::thread::spawn(move || {
            (remote.is_current(), remote.run_pending())
        })
        .join()
        .unwrap();
        assert!(!current);
        assert!(matches!(drained, Err(ChannelError::OffContext { .. })));
    }

    #[test]
    fn test_jobs_from_other_threads_run_on_owner() {
        let ctx = MainContext::new();
        let owner = std::thread::current().id();
        let seen = Arc::new(std::sync::Mutex::new(None));

        let remote = Arc::clone(&ctx);
        let seen_clone = Arc::clone(&seen);
        std::thread::spawn(move || {
            remote.dispatch(Box::new(move || {
                *seen_clone.lock().unwrap() = Some(std::thread::current().id());
                Ok(())
            }));
        })
        .join()
        .unwrap();

        ctx.run_pending().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(owner));
    }

    #[test]
    fn test_run_pending_reports_first_error_after_draining() {
        let ctx = MainContext::new();
        let count = Arc::new(AtomicUsize::new(0));
        ctx.dispatch(Box::new(|| {
            Err(ChannelError::OffContext {
                channel: "test".to_owned(),
                operation: "first",
            })
        }));
        let count_clone = Arc::clone(&count);
        ctx.dispatch(Box::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let result = ctx.run_pending();
        assert!(matches!(
            result,
            Err(ChannelError::OffContext {
                operation: "first",
                ..
            })
        ));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_run_loop_until_cancelled() {
        let ctx = MainContext::new();
        let shutdown = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count = Arc::clone(&count);
            ctx.dispatch(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        let stopper = shutdown.clone();
        ctx.dispatch(Box::new(move || {
            stopper.cancel();
            Ok(())
        }));

        ctx.run(shutdown).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
