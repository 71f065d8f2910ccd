//! Per-key populator coalescing.
//!
//! Under concurrent misses on the same key, exactly one caller runs the
//! populator; everyone else subscribes to its outcome. Success and failure
//! are both delivered as-is to all waiters — no silent swallowing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{FabricError, FabricResult};

type FlightMap<T> = Arc<Mutex<HashMap<String, broadcast::Sender<FabricResult<T>>>>>;

/// Registry of in-flight populators keyed by cache key.
pub struct SingleFlight<T: Clone + Send> {
    inflight: FlightMap<T>,
}

impl<T: Clone + Send> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of populators currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().len()
    }
}

impl<T: Clone + Send + 'static> SingleFlight<T> {
    /// Run `populate` for `key`, coalescing with any concurrent run.
    ///
    /// The first caller for a key becomes the leader and executes the
    /// populator; concurrent callers await the leader's outcome. If the
    /// leader's task is cancelled mid-flight, the registry entry is cleaned
    /// up and waiters receive an error rather than hanging — the key is not
    /// poisoned and the next caller starts a fresh flight.
    pub async fn run<F, Fut>(&self, key: &str, populate: F) -> FabricResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FabricResult<T>>,
    {
        let receiver = {
            let mut map = self.inflight.lock();
            match map.get(key) {
                Some(sender) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    map.insert(key.to_string(), sender);
                    None
                }
            }
        };

        if let Some(mut rx) = receiver {
            debug!("joining in-flight population for key {}", key);
            return match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => Err(FabricError::Internal(format!(
                    "populator for '{}' was cancelled before producing a result",
                    key
                ))),
            };
        }

        // Leader path. The guard removes the registry entry even if the
        // populator future is dropped mid-poll.
        let mut guard = FlightGuard {
            key: key.to_string(),
            inflight: Arc::clone(&self.inflight),
            armed: true,
        };

        let outcome = populate().await;

        if let Some(sender) = guard.disarm() {
            let _ = sender.send(outcome.clone());
        }
        outcome
    }
}

struct FlightGuard<T: Clone + Send> {
    key: String,
    inflight: FlightMap<T>,
    armed: bool,
}

impl<T: Clone + Send> FlightGuard<T> {
    /// Remove and return the sender, disabling the drop cleanup.
    fn disarm(&mut self) -> Option<broadcast::Sender<FabricResult<T>>> {
        self.armed = false;
        self.inflight.lock().remove(&self.key)
    }
}

impl<T: Clone + Send> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if self.armed {
            self.inflight.lock().remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_runs_coalesce_to_one_populator() {
        let flights = Arc::new(SingleFlight::<u64>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run("shared", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(7u64)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_delivered_to_all_waiters() {
        let flights = Arc::new(SingleFlight::<u64>::new());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flights = Arc::clone(&flights);
            handles.push(tokio::spawn(async move {
                flights
                    .run("doomed", || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(FabricError::UpstreamUnavailable("boom".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(FabricError::UpstreamUnavailable(_))));
        }
    }

    #[tokio::test]
    async fn test_sequential_runs_do_not_coalesce() {
        let flights = SingleFlight::<u64>::new();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result = flights
                .run("seq", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1u64)
                })
                .await;
            assert!(result.is_ok());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_poison_key() {
        let flights = Arc::new(SingleFlight::<u64>::new());

        let leader = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run("slow", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(1u64)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        // Registry was cleaned up; a fresh flight succeeds immediately
        assert_eq!(flights.in_flight(), 0);
        let result = flights.run("slow", || async { Ok(2u64) }).await;
        assert_eq!(result.unwrap(), 2);
    }
}
