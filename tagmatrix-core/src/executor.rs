//! Bounded-parallelism batch execution.
//!
//! `BatchExecutor` hands batches to a worker pool and feeds each result to
//! a completion callback on the calling thread, in completion order. At
//! most `parallelism` batches are in flight at a time, so at most that many
//! batch inputs and results are held in memory.
//!
//! A batch whose worker fails or panics, or whose completion callback fails,
//! is recorded in the `ExecutionReport` and logged; the remaining batches
//! still run. There is no timeout: a worker that never returns keeps the
//! run waiting.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{CoreError, Result};

/// Default number of items per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Worker pool flavour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    /// CPU-bound work on a rayon thread pool.
    #[default]
    Compute,
    /// Blocking I/O on a tokio blocking pool, for workers that spend most
    /// of their time waiting on a record source.
    Io,
}

/// Stage a batch failed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// The worker returned an error or panicked.
    Compute,
    /// The completion callback (usually a sink write) failed.
    Write,
}

/// One failed batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub batch: usize,
    pub stage: FailureStage,
    pub message: String,
}

/// Outcome of a run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExecutionReport {
    /// Pool the batches ran on.
    pub concurrency: Concurrency,
    /// Batches dispatched.
    pub batches: usize,
    /// Batches whose worker and callback both succeeded.
    pub succeeded: usize,
    pub failures: Vec<BatchFailure>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl ExecutionReport {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Whether every batch went through.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Indices of failed batches, sorted.
    pub fn failed_batches(&self) -> Vec<usize> {
        let mut batches: Vec<usize> = self.failures.iter().map(|f| f.batch).collect();
        batches.sort_unstable();
        batches
    }
}

/// Progress snapshot passed to observers after each completed batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub failed: usize,
    /// Total batch count, when known up front.
    pub total: Option<usize>,
}

/// Callback invoked on the orchestrating thread after each batch.
pub type ProgressFn = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

enum Pool {
    Compute(rayon::ThreadPool),
    Io(tokio::runtime::Runtime),
}

type Outcome<R> = (usize, std::thread::Result<Result<R>>);

/// Runs batches on a bounded worker pool.
pub struct BatchExecutor {
    batch_size: usize,
    parallelism: usize,
    concurrency: Concurrency,
    pool: Pool,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for BatchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchExecutor")
            .field("batch_size", &self.batch_size)
            .field("parallelism", &self.parallelism)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// Parallelism to use when none is configured.
pub fn default_parallelism() -> usize {
    num_cpus::get().max(1)
}

impl BatchExecutor {
    /// Create an executor. `parallelism` defaults to the number of CPUs.
    pub fn new(batch_size: usize, parallelism: Option<usize>, concurrency: Concurrency) -> Result<Self> {
        if batch_size == 0 {
            return Err(CoreError::config("batch size must be at least 1"));
        }
        let parallelism = match parallelism {
            Some(0) => return Err(CoreError::config("parallelism must be at least 1")),
            Some(n) => n,
            None => default_parallelism(),
        };

        let pool = match concurrency {
            Concurrency::Compute => Pool::Compute(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(parallelism)
                    .thread_name(|i| format!("tagmatrix-worker-{}", i))
                    .build()
                    .map_err(|e| CoreError::Executor {
                        message: e.to_string(),
                    })?,
            ),
            Concurrency::Io => Pool::Io(
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .max_blocking_threads(parallelism)
                    .thread_name("tagmatrix-io")
                    .build()
                    .map_err(|e| CoreError::Executor {
                        message: e.to_string(),
                    })?,
            ),
        };

        Ok(Self {
            batch_size,
            parallelism,
            concurrency,
            pool,
            progress: None,
        })
    }

    /// Report progress to `progress` after every batch.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Split `items` into batches of `batch_size` and run them.
    pub fn run<T, R, W, C>(&self, items: Vec<T>, worker: W, on_complete: C) -> Result<ExecutionReport>
    where
        T: Send + 'static,
        R: Send + 'static,
        W: Fn(usize, Vec<T>) -> Result<R> + Send + Sync + 'static,
        C: FnMut(usize, R) -> Result<()>,
    {
        self.run_batches(partition(items, self.batch_size), worker, on_complete)
    }

    /// Run pre-built batches.
    ///
    /// `batches` is pulled lazily, so batch inputs are only materialized
    /// when a worker slot frees up.
    pub fn run_batches<I, B, R, W, C>(&self, batches: I, worker: W, mut on_complete: C) -> Result<ExecutionReport>
    where
        I: IntoIterator<Item = B>,
        B: Send + 'static,
        R: Send + 'static,
        W: Fn(usize, B) -> Result<R> + Send + Sync + 'static,
        C: FnMut(usize, R) -> Result<()>,
    {
        let start = Instant::now();
        let worker = Arc::new(worker);
        let (tx, rx) = mpsc::channel::<Outcome<R>>();

        let mut pending = batches.into_iter().enumerate();
        let total = match pending.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        };

        let mut report = ExecutionReport {
            concurrency: self.concurrency,
            ..Default::default()
        };
        let mut in_flight = 0usize;

        loop {
            while in_flight < self.parallelism {
                let Some((index, batch)) = pending.next() else {
                    break;
                };
                self.dispatch(index, batch, Arc::clone(&worker), tx.clone());
                in_flight += 1;
                report.batches += 1;
            }

            if in_flight == 0 {
                break;
            }

            let (index, outcome) = rx.recv().map_err(|_| CoreError::Executor {
                message: "worker channel closed with batches in flight".to_string(),
            })?;
            in_flight -= 1;

            match outcome {
                Ok(Ok(result)) => match on_complete(index, result) {
                    Ok(()) => {
                        report.succeeded += 1;
                        tracing::debug!("Batch {} completed", index);
                    }
                    Err(e) => {
                        tracing::error!("Batch {} write failed: {}", index, e);
                        report.failures.push(BatchFailure {
                            batch: index,
                            stage: FailureStage::Write,
                            message: e.to_string(),
                        });
                    }
                },
                Ok(Err(e)) => {
                    tracing::warn!("Batch {} failed: {}", index, e);
                    report.failures.push(BatchFailure {
                        batch: index,
                        stage: FailureStage::Compute,
                        message: e.to_string(),
                    });
                }
                Err(payload) => {
                    let err = CoreError::WorkerPanic {
                        message: panic_message(payload.as_ref()),
                    };
                    tracing::warn!("Batch {} failed: {}", index, err);
                    report.failures.push(BatchFailure {
                        batch: index,
                        stage: FailureStage::Compute,
                        message: err.to_string(),
                    });
                }
            }

            if let Some(progress) = &self.progress {
                progress(&BatchProgress {
                    completed: report.succeeded + report.failed(),
                    failed: report.failed(),
                    total,
                });
            }
        }

        report.elapsed = start.elapsed();
        tracing::debug!(
            "Executed {} batches ({} failed) in {:?}",
            report.batches,
            report.failed(),
            report.elapsed
        );
        Ok(report)
    }

    fn dispatch<B, R, W>(&self, index: usize, batch: B, worker: Arc<W>, tx: mpsc::Sender<Outcome<R>>)
    where
        B: Send + 'static,
        R: Send + 'static,
        W: Fn(usize, B) -> Result<R> + Send + Sync + 'static,
    {
        let job = move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| worker(index, batch)));
            // The receiver only goes away once the run is over.
            let _ = tx.send((index, outcome));
        };

        match &self.pool {
            Pool::Compute(pool) => pool.spawn(job),
            Pool::Io(runtime) => {
                runtime.spawn_blocking(job);
            }
        }
    }
}

/// Split `items` into consecutive batches of at most `batch_size`.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut iter = items.into_iter();
    loop {
        let batch: Vec<T> = iter.by_ref().take(batch_size).collect();
        if batch.is_empty() {
            break;
        }
        batches.push(batch);
    }
    batches
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
