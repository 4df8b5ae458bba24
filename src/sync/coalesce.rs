//! Keyed request coalescing.
//!
//! Deduplicates concurrent identical lookups: while one caller computes the
//! value for a key, later callers for the same key await the same
//! computation instead of issuing their own. Nothing is cached once the
//! computation finishes (this is an in-flight map, not a cache) and the
//! map is per-instance and non-durable.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::types::Result;

/// Single-flight map keyed by `K`.
pub struct SingleFlight<K, V> {
    inflight: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `key`, sharing the result with every caller that
    /// arrives while it is in flight. A failed computation is not sticky:
    /// the next waiter (or the next fresh call) computes again.
    pub async fn run<F, Fut>(&self, key: K, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let cell = self
            .inflight
            .entry(key.clone())
            .or_default()
            .clone();

        let result = cell.get_or_try_init(compute).await.cloned();

        // First finisher clears the slot; stragglers still resolve from
        // their cloned cell.
        self.inflight.remove(&key);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_computation() {
        let flight = Arc::new(SingleFlight::<String, u64>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let compute = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(42u64)
        };

        let (a, b) = tokio::join!(
            flight.run("k".to_string(), || compute(Arc::clone(&calls))),
            flight.run("k".to_string(), || compute(Arc::clone(&calls))),
        );

        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_recompute() {
        let flight = SingleFlight::<String, u64>::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let got = flight
                .run("k".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7u64)
                })
                .await
                .unwrap();
            assert_eq!(got, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_not_sticky() {
        let flight = SingleFlight::<String, u64>::new();

        let failed = flight
            .run("k".to_string(), || async {
                Err(crate::types::SyncError::Database("offline".into()))
            })
            .await;
        assert!(failed.is_err());

        let ok = flight.run("k".to_string(), || async { Ok(9u64) }).await;
        assert_eq!(ok.unwrap(), 9);
    }
}
