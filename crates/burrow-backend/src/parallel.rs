//! Parallel fan-out over a set of backend objects.
//!
//! Re-usable primitive for "do this to N containers" operations: bounded
//! parallelism, per-item error capture, panic isolation, and cooperative
//! cancellation. The success/failure maps returned always partition the
//! input id set exactly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::BackendError;

/// Identifies one item of a fan-out; opaque to the primitive.
pub type OperationId = String;

/// Default cap on concurrently-running operations.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Result of a fan-out: every input id lands in exactly one of the two maps.
#[derive(Debug, Default)]
pub struct ParallelOutcome {
    pub succeeded: BTreeSet<OperationId>,
    pub failed: BTreeMap<OperationId, BackendError>,
}

impl ParallelOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `op` for every id with at most `max_in_flight` running at once.
///
/// A panic inside one operation is captured as [`BackendError::Panic`] for
/// that id alone; the other operations are unaffected. When `cancel` fires,
/// operations that have not yet started (or are still waiting on a slot)
/// fail with [`BackendError::Cancelled`]; in-flight operations see the same
/// token and are expected to abandon their work.
pub async fn run_in_parallel<F, Fut>(
    cancel: &CancellationToken,
    ids: BTreeSet<OperationId>,
    max_in_flight: usize,
    op: F,
) -> ParallelOutcome
where
    F: Fn(OperationId, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<(), BackendError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let mut handles: Vec<(OperationId, JoinHandle<Result<(), BackendError>>)> =
        Vec::with_capacity(ids.len());

    for id in ids {
        let permit_source = Arc::clone(&semaphore);
        let task_cancel = cancel.clone();
        let fut = op(id.clone(), task_cancel.clone());
        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                permit = permit_source.acquire_owned() => {
                    permit.expect("fan-out semaphore is never closed")
                }
                _ = task_cancel.cancelled() => return Err(BackendError::Cancelled),
            };
            tokio::select! {
                result = fut => result,
                _ = task_cancel.cancelled() => Err(BackendError::Cancelled),
            }
        });
        handles.push((id, handle));
    }

    let mut outcome = ParallelOutcome::default();
    for (id, handle) in handles {
        match handle.await {
            Ok(Ok(())) => {
                outcome.succeeded.insert(id);
            }
            Ok(Err(err)) => {
                outcome.failed.insert(id, err);
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    format!("{join_err}")
                } else {
                    "operation task aborted".to_string()
                };
                warn!(%id, error = %message, "fan-out operation died");
                outcome.failed.insert(id, BackendError::Panic(message));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(n: usize) -> BTreeSet<OperationId> {
        (0..n).map(|i| format!("op-{i}")).collect()
    }

    #[tokio::test]
    async fn outcome_partitions_input_exactly() {
        let cancel = CancellationToken::new();
        let outcome = run_in_parallel(&cancel, ids(10), 4, |id, _| async move {
            if id.ends_with('3') || id.ends_with('7') {
                Err(BackendError::op_failed("test", "scripted failure"))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome.succeeded.len() + outcome.failed.len(), 10);
        assert_eq!(outcome.failed.len(), 2);
        assert!(outcome.failed.contains_key("op-3"));
        assert!(outcome.failed.contains_key("op-7"));
        for id in &outcome.succeeded {
            assert!(!outcome.failed.contains_key(id));
        }
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let outcome = run_in_parallel(&cancel, ids(20), 3, |_, _| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert!(outcome.all_succeeded());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn panic_in_one_operation_is_isolated() {
        let cancel = CancellationToken::new();
        let outcome = run_in_parallel(&cancel, ids(5), 8, |id, _| async move {
            if id == "op-2" {
                panic!("scripted panic");
            }
            Ok(())
        })
        .await;

        assert_eq!(outcome.succeeded.len(), 4);
        assert!(matches!(
            outcome.failed.get("op-2"),
            Some(BackendError::Panic(_))
        ));
    }

    #[tokio::test]
    async fn cancellation_marks_pending_operations_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run_in_parallel(&cancel, ids(6), 2, |_, _| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 6);
        for err in outcome.failed.values() {
            assert!(matches!(err, BackendError::Cancelled));
        }
    }

    #[tokio::test]
    async fn empty_input_yields_empty_outcome() {
        let cancel = CancellationToken::new();
        let outcome =
            run_in_parallel(&cancel, BTreeSet::new(), 4, |_, _| async move { Ok(()) }).await;
        assert!(outcome.succeeded.is_empty());
        assert!(outcome.failed.is_empty());
    }
}
