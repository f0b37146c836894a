//! Bounded-concurrency worker pool (spec §4.2).
//!
//! Executes a sequence of items with at most N workers in flight,
//! supporting cancellation, weighted priority scheduling, `allSettled`
//! collection, and abort-on-first-error, via an `Arc<Semaphore>` plus
//! per-task `tokio::spawn` dispatch loop reused by both `run_selected`
//! and `dag::execute_dag`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleMode {
    All,
    AllSettled,
}

#[derive(Clone)]
pub struct PoolOptions {
    pub cancel: CancellationToken,
    pub abort_on_error: bool,
    pub settle_mode: SettleMode,
    pub use_priority_scheduling: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            abort_on_error: false,
            settle_mode: SettleMode::AllSettled,
            use_priority_scheduling: false,
        }
    }
}

/// One item's outcome, always present at its input index regardless of
/// settle mode (spec §4.2: "result array length equals input length").
pub enum Slot<T> {
    Ok(T),
    Err(anyhow::Error),
    /// Never dispatched — pool aborted before this item was picked up.
    NotRun,
}

/// Run `worker` over `items` with at most `concurrency` in flight.
///
/// `weight_of` assigns a dispatch weight per input index (used only when
/// `opts.use_priority_scheduling` is set; weights ≤ 0 are treated as 1,
/// ties broken by input index).
pub async fn run_pool<T, I, F, Fut, W>(
    items: Vec<I>,
    concurrency: usize,
    worker: F,
    weight_of: W,
    opts: PoolOptions,
) -> Result<Vec<Slot<T>>, PoolError>
where
    T: Send + 'static,
    I: Clone + Send + 'static,
    F: Fn(usize, I, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    W: Fn(usize, &I) -> i64,
{
    let n = items.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    if opts.cancel.is_cancelled() {
        return Err(PoolError::Aborted);
    }

    let concurrency = concurrency.clamp(1, n);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let worker = Arc::new(worker);

    // Build dispatch order: priority-weighted or plain input order.
    let mut order: Vec<usize> = (0..n).collect();
    if opts.use_priority_scheduling {
        let weights: Vec<i64> = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let w = weight_of(i, item);
                if w <= 0 { 1 } else { w }
            })
            .collect();
        order.sort_by(|&a, &b| weights[b].cmp(&weights[a]).then(a.cmp(&b)));
    }

    let mut results: Vec<Slot<T>> = (0..n).map(|_| Slot::NotRun).collect();
    let mut handles = Vec::with_capacity(n);
    let abort = Arc::new(std::sync::atomic::AtomicBool::new(false));

    for &index in &order {
        if opts.cancel.is_cancelled() || abort.load(std::sync::atomic::Ordering::SeqCst) {
            break;
        }

        let permit = semaphore.clone().acquire_owned().await;
        let permit = match permit {
            Ok(p) => p,
            Err(_) => break, // semaphore closed — pool shutting down
        };

        if opts.cancel.is_cancelled() {
            drop(permit);
            break;
        }

        let item = items[index].clone();
        let worker = worker.clone();
        let child_cancel = opts.cancel.child_token();
        let abort_on_error = opts.abort_on_error;
        let abort_flag = abort.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let outcome = (*worker)(index, item, child_cancel).await;
            if outcome.is_err() && abort_on_error {
                abort_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            (index, outcome)
        });
        handles.push(handle);
    }

    let mut first_error: Option<anyhow::Error> = None;
    for handle in handles {
        match handle.await {
            Ok((index, Ok(value))) => results[index] = Slot::Ok(value),
            Ok((index, Err(e))) => {
                if first_error.is_none() {
                    first_error = Some(anyhow::anyhow!("item {index} failed: {e}"));
                }
                results[index] = Slot::Err(e);
            }
            Err(join_err) => {
                tracing::warn!(error = %join_err, "pool worker task panicked or was cancelled");
            }
        }
    }

    if opts.settle_mode == SettleMode::All {
        if let Some(e) = first_error {
            return Err(PoolError::WorkerFailed { index: 0, source: e });
        }
    }

    if opts.cancel.is_cancelled() && results.iter().all(|s| matches!(s, Slot::NotRun)) {
        return Err(PoolError::Aborted);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn empty_input_yields_empty_result_no_workers_spawned() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let spawned2 = spawned.clone();
        let result = run_pool::<(), i32, _, _, _>(
            vec![],
            4,
            move |_, _, _| {
                spawned2.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            |_, _| 1,
            PoolOptions::default(),
        )
        .await
        .unwrap();
        assert!(result.is_empty());
        assert_eq!(spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn preserves_input_order_regardless_of_completion_order() {
        let items = vec![30u64, 10, 20];
        let result = run_pool(
            items,
            3,
            |_index, delay_ms, _cancel| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<u64, anyhow::Error>(delay_ms)
            },
            |_, _| 1,
            PoolOptions::default(),
        )
        .await
        .unwrap();

        let values: Vec<u64> = result
            .into_iter()
            .map(|s| match s {
                Slot::Ok(v) => v,
                _ => panic!("expected Ok"),
            })
            .collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn max_concurrency_equal_to_item_count_runs_all_at_once() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let items = vec![0, 1, 2, 3];

        let in_flight2 = in_flight.clone();
        let max_observed2 = max_observed.clone();
        let result = run_pool(
            items.clone(),
            items.len(),
            move |_, _, _| {
                let in_flight = in_flight2.clone();
                let max_observed = max_observed2.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            },
            |_, _| 1,
            PoolOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.len(), items.len());
        assert!(max_observed.load(Ordering::SeqCst) <= items.len());
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_returns_aborted_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_pool(
            vec![1, 2, 3],
            2,
            |_, _, _| async { Ok::<(), anyhow::Error>(()) },
            |_, _| 1,
            PoolOptions { cancel, ..PoolOptions::default() },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PoolError::Aborted));
    }

    #[tokio::test]
    async fn all_settled_mode_captures_every_error_without_aborting_peers() {
        let items = vec![1, 2, 3];
        let result = run_pool(
            items,
            3,
            |index, _, _| async move {
                if index == 1 {
                    anyhow::bail!("boom");
                }
                Ok::<i32, anyhow::Error>(index as i32)
            },
            |_, _| 1,
            PoolOptions { settle_mode: SettleMode::AllSettled, ..PoolOptions::default() },
        )
        .await
        .unwrap();

        assert!(matches!(result[0], Slot::Ok(0)));
        assert!(matches!(result[1], Slot::Err(_)));
        assert!(matches!(result[2], Slot::Ok(2)));
    }

    #[tokio::test]
    async fn higher_weight_items_dispatch_before_lower_weight_ties_broken_by_index() {
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let items = vec![0, 1, 2, 3];
        let weights = [1i64, 5, 5, 1];
        let order2 = order.clone();

        run_pool(
            items,
            1,
            move |index, _, _| {
                let order = order2.clone();
                async move {
                    order.lock().await.push(index);
                    Ok::<(), anyhow::Error>(())
                }
            },
            move |i, _| weights[i],
            PoolOptions { use_priority_scheduling: true, ..PoolOptions::default() },
        )
        .await
        .unwrap();

        let observed = order.lock().await.clone();
        // weight 5 items (1, 2) dispatch before weight 1 items (0, 3);
        // ties within equal weight broken by input index.
        assert_eq!(observed, vec![1, 2, 0, 3]);
    }
}
