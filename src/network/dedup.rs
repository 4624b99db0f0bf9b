//! Request Deduplication
//!
//! Single-flight execution: concurrent callers asking for the same key share
//! one in-flight execution and all observe its outcome.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::trace;

type InFlight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

// == Request Deduplicator ==
/// Registry of pending executions keyed by request key.
///
/// Per key: idle, then pending on the first `acquire`, then settled (every
/// joiner receives a clone of the outcome), then idle again once the
/// registration is dropped.
pub struct RequestDeduplicator<T, E> {
    in_flight: Arc<Mutex<HashMap<String, InFlight<T, E>>>>,
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // == Acquire ==
    /// Runs `f` unless an execution for `key` is already pending, in which
    /// case this call joins it instead.
    ///
    /// `f` is invoked lazily from inside the shared future, never while the
    /// registry lock is held.
    pub async fn acquire<F, Fut>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(pending) => {
                    trace!(key = %key, "Joining in-flight request");
                    pending.clone()
                }
                None => {
                    let registry = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    let pending = async move {
                        let outcome = f().await;
                        // Deregister before fan-out so later callers start fresh.
                        registry.lock().remove(&owned_key);
                        outcome
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_string(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Number of keys with a pending execution.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }
}

impl<T, E> Default for RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for RequestDeduplicator<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let dedup = Arc::new(RequestDeduplicator::<u32, String>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let gate = gate.shared();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let dedup = dedup.clone();
            let calls = calls.clone();
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                dedup
                    .acquire("user:1", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = gate.await;
                        Ok(42)
                    })
                    .await
            }));
        }

        // Let every caller register or join before releasing the loader.
        while dedup.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        release.send(()).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_execution_across_worker_threads() {
        let dedup = Arc::new(RequestDeduplicator::<u32, String>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(AtomicUsize::new(0));
        let (release, gate) = oneshot::channel::<()>();
        let gate = gate.shared();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let dedup = dedup.clone();
                let calls = calls.clone();
                let entered = entered.clone();
                let gate = gate.clone();
                tokio::spawn(async move {
                    entered.fetch_add(1, Ordering::SeqCst);
                    dedup
                        .acquire("user:2", move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            let _ = gate.await;
                            Ok(7)
                        })
                        .await
                })
            })
            .collect();

        while entered.load(Ordering::SeqCst) < 16 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        release.send(()).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_is_fanned_out_identically() {
        let dedup = RequestDeduplicator::<u32, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (first_calls, second_calls) = (calls.clone(), calls.clone());

        let (a, b) = tokio::join!(
            dedup.acquire("k", move || async move {
                first_calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Err("boom".to_string())
            }),
            dedup.acquire("k", move || async move {
                second_calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }),
        );

        assert_eq!(a, Err("boom".to_string()));
        assert_eq!(b, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dedup.is_pending("k"));
    }

    #[tokio::test]
    async fn test_settled_key_runs_again() {
        let dedup = RequestDeduplicator::<u32, String>::new();

        assert_eq!(dedup.acquire("k", || async { Ok(1) }).await, Ok(1));
        assert_eq!(dedup.acquire("k", || async { Ok(2) }).await, Ok(2));
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_join() {
        let dedup = RequestDeduplicator::<&'static str, String>::new();

        let (a, b) = tokio::join!(
            dedup.acquire("a", || async { Ok("a") }),
            dedup.acquire("b", || async { Ok("b") }),
        );

        assert_eq!(a, Ok("a"));
        assert_eq!(b, Ok("b"));
    }
}
