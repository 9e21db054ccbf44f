//! Parallel loading of several named datasets.
//!
//! One task per requested name, run either on dedicated threads (suited to
//! I/O-bound retrievers) or on a private rayon pool (suited to CPU-bound
//! parsing). Results come back over a channel so an overall deadline can
//! abandon unfinished tasks; abandoned tasks keep running in the background
//! and are reported as timed out.

use crate::error::LoadError;
use crate::progress::LoadProgress;
use crate::reconcile::{LoadFlags, LoadOutcome, Reconciler};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How load tasks are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One OS thread per name.
    #[default]
    Threads,
    /// A rayon pool; `None` sizes it to the available cores.
    Pool { workers: Option<usize> },
}

/// Options for [`load_parallel`].
#[derive(Debug, Clone, Default)]
pub struct ParallelOptions {
    pub strategy: ExecutionStrategy,
    pub flags: LoadFlags,
    /// Return an error if any name fails instead of reporting it per name.
    pub fail_on_error: bool,
    /// Overall deadline for the whole batch.
    pub deadline: Option<Duration>,
    /// Apply each dataset's registry transform chain after loading.
    pub transform: bool,
}

/// Per-name outcome of a batch load, in request order.
#[derive(Debug)]
pub struct BatchLoad {
    pub results: Vec<(String, Result<LoadOutcome, LoadError>)>,
}

impl BatchLoad {
    pub fn successes(&self) -> impl Iterator<Item = (&str, &LoadOutcome)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().ok().map(|o| (name.as_str(), o)))
    }

    pub fn errors(&self) -> impl Iterator<Item = (&str, &LoadError)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn failed(&self) -> usize {
        self.errors().count()
    }
}

type TaskResult = (usize, Result<LoadOutcome, LoadError>);

/// Load every name in `names`, preserving their order in the result.
///
/// One failure never cancels the others. With `fail_on_error`, any failure
/// turns the whole call into [`LoadError::BatchFailed`].
pub fn load_parallel(
    reconciler: &Arc<Reconciler>,
    names: &[String],
    opts: &ParallelOptions,
    progress: Option<&dyn LoadProgress>,
) -> Result<BatchLoad, LoadError> {
    let total = names.len();
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<TaskResult>();
    let mut slots: Vec<Option<Result<LoadOutcome, LoadError>>> = (0..total).map(|_| None).collect();

    let task = |index: usize, name: String| {
        let reconciler = Arc::clone(reconciler);
        let tx = tx.clone();
        let flags = opts.flags;
        let transform = opts.transform;
        move || {
            let result = if transform {
                reconciler.load_transformed(&name, flags)
            } else {
                reconciler.load(&name, flags)
            };
            // The receiver is gone once the deadline has passed.
            let _ = tx.send((index, result));
        }
    };

    // Kept alive until every result is in or the deadline passes.
    let _pool = match opts.strategy {
        ExecutionStrategy::Threads => {
            for (index, name) in names.iter().enumerate() {
                if let Some(p) = progress {
                    p.on_start(name, index, total);
                }
                let spawned = std::thread::Builder::new()
                    .name(format!("econlab-load-{index}"))
                    .spawn(task(index, name.clone()));
                if let Err(e) = spawned {
                    slots[index] = Some(Err(LoadError::Worker {
                        name: name.clone(),
                        reason: e.to_string(),
                    }));
                }
            }
            None
        }
        ExecutionStrategy::Pool { workers } => {
            let mut builder = rayon::ThreadPoolBuilder::new()
                .thread_name(|i| format!("econlab-pool-{i}"));
            if let Some(n) = workers {
                builder = builder.num_threads(n.max(1));
            }
            let pool = builder.build().map_err(|e| LoadError::Worker {
                name: names.join(", "),
                reason: e.to_string(),
            })?;
            for (index, name) in names.iter().enumerate() {
                if let Some(p) = progress {
                    p.on_start(name, index, total);
                }
                pool.spawn(task(index, name.clone()));
            }
            Some(pool)
        }
    };
    drop(tx);

    let mut pending = slots.iter().filter(|s| s.is_none()).count();
    while pending > 0 {
        let received = match opts.deadline {
            Some(deadline) => match deadline.checked_sub(started.elapsed()) {
                Some(remaining) => rx.recv_timeout(remaining).ok(),
                None => None,
            },
            None => rx.recv().ok(),
        };
        let Some((index, result)) = received else {
            break;
        };
        if let Some(p) = progress {
            p.on_complete(&names[index], index, total, result.as_ref());
        }
        slots[index] = Some(result);
        pending -= 1;
    }

    let results: Vec<(String, Result<LoadOutcome, LoadError>)> = names
        .iter()
        .zip(slots)
        .enumerate()
        .map(|(index, (name, slot))| {
            let result = slot.unwrap_or_else(|| {
                let err = LoadError::TimedOut { name: name.clone() };
                if let Some(p) = progress {
                    p.on_complete(name, index, total, Err(&err));
                }
                Err(err)
            });
            (name.clone(), result)
        })
        .collect();
    let batch = BatchLoad { results };

    let failed: Vec<String> = batch.errors().map(|(name, _)| name.to_string()).collect();
    if let Some(p) = progress {
        p.on_batch_complete(total - failed.len(), failed.len(), total);
    }
    for (name, err) in batch.errors() {
        tracing::warn!(dataset = name, error = %err, "load failed");
    }
    if opts.fail_on_error && !failed.is_empty() {
        return Err(LoadError::BatchFailed { failed, total });
    }
    Ok(batch)
}
