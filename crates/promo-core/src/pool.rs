//! Bounded-concurrency, all-or-nothing construction of per-file resources.
//!
//! One blocking build task runs per input, at most `max_workers` at a time.
//! Every task runs to completion. Outcomes are gathered in the join phase:
//! the first failure observed is the one reported, and once all tasks have
//! joined, every resource that did build is released exactly once before
//! the error is returned.

use crate::{IndexError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Build one `T` per input, preserving input order in the result.
///
/// `build` runs on the blocking thread pool. On failure, `release` is called
/// on every successfully built `T` and only the first error is returned.
pub async fn build_all<I, T, B, R>(
    inputs: Vec<I>,
    max_workers: usize,
    build: B,
    release: R,
) -> Result<Vec<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    B: Fn(I) -> Result<T> + Send + Sync + 'static,
    R: Fn(T),
{
    let total = inputs.len();
    let build = Arc::new(build);
    let permits = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for (idx, input) in inputs.into_iter().enumerate() {
        let build = Arc::clone(&build);
        let permit = Arc::clone(&permits)
            .acquire_owned()
            .await
            .map_err(|e| IndexError::Task {
                message: format!("build pool closed: {}", e),
            })?;

        tasks.spawn_blocking(move || {
            let _permit = permit;
            debug!("Build task {} of {} started", idx + 1, total);
            (idx, build(input))
        });
    }

    let mut built: BTreeMap<usize, T> = BTreeMap::new();
    let mut first_error: Option<IndexError> = None;

    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok((idx, Ok(item))) => {
                built.insert(idx, item);
                continue;
            }
            Ok((_, Err(e))) => e,
            Err(e) => IndexError::Task {
                message: e.to_string(),
            },
        };
        if first_error.is_none() {
            first_error = Some(outcome);
        } else {
            debug!("Suppressing additional build failure: {}", outcome);
        }
    }

    if let Some(err) = first_error {
        info!(
            "Build failed, releasing {} of {} resources: {}",
            built.len(),
            total,
            err
        );
        for item in built.into_values() {
            release(item);
        }
        return Err(err);
    }

    Ok(built.into_values().collect())
}
