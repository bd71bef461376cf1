//! Data-parallel execution context.
//!
//! Every kernel in octet is launched through an [`ExecutionContext`], which
//! owns a rayon thread pool. Launches are synchronous: when
//! [`ExecutionContext::launch`] returns, every worker has finished and all
//! writes are visible to the caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, trace};

use crate::error::{OctetError, Result};

/// Global context, created on first use.
///
/// The error is kept as a string since [`OctetError`] is not `Clone`.
static GLOBAL_CONTEXT: OnceLock<std::result::Result<Arc<ExecutionContext>, String>> =
    OnceLock::new();

/// Execution context wrapping a worker pool.
pub struct ExecutionContext {
    pool: ThreadPool,
    threads: usize,
}

impl ExecutionContext {
    /// Get or create the process-wide context.
    ///
    /// The pool is sized by rayon's defaults (`RAYON_NUM_THREADS` or the
    /// number of logical CPUs).
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::ExecutionFault`] if the pool could not be built.
    pub fn global() -> Result<Arc<ExecutionContext>> {
        GLOBAL_CONTEXT
            .get_or_init(|| {
                Self::build(None).map(Arc::new).map_err(|e| {
                    tracing::error!("Failed to initialize execution context: {}", e);
                    e.to_string()
                })
            })
            .clone()
            .map_err(|message| OctetError::ExecutionFault {
                kernel: "context",
                message,
            })
    }

    /// Create a context with exactly `threads` workers.
    ///
    /// Prefer [`ExecutionContext::global()`] unless a dedicated pool is needed.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] for zero threads and
    /// [`OctetError::ExecutionFault`] if the pool could not be built.
    pub fn with_threads(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(OctetError::InvalidArgument(
                "thread count must be positive".into(),
            ));
        }
        Self::build(Some(threads))
    }

    fn build(threads: Option<usize>) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("octet-worker-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build().map_err(|e| OctetError::ExecutionFault {
            kernel: "context",
            message: e.to_string(),
        })?;
        let threads = pool.current_num_threads();
        debug!("Initialized execution context with {} workers", threads);
        Ok(Self { pool, threads })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `kernel` on this context's pool and wait for it.
    ///
    /// Parallel iterators used inside `kernel` run on this pool. A panic in
    /// any worker is caught and reported as [`OctetError::ExecutionFault`];
    /// buffers the kernel was writing are then in an unspecified state.
    ///
    /// # Errors
    ///
    /// Returns whatever `kernel` returns, or an execution fault on panic.
    pub fn launch<T, F>(&self, name: &'static str, kernel: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send,
        T: Send,
    {
        trace!(kernel = name, threads = self.threads, "launch");
        let outcome = self
            .pool
            .install(|| panic::catch_unwind(AssertUnwindSafe(kernel)));
        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                debug!(kernel = name, "kernel panicked: {}", message);
                Err(OctetError::ExecutionFault {
                    kernel: name,
                    message,
                })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("threads", &self.threads)
            .finish()
    }
}
